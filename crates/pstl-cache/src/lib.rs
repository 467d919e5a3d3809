//! In-memory leads cache + background refresh scheduling.
//!
//! The [`CacheStore`] holds the latest complete snapshot of leads behind a
//! single coarse lock; the refresh loop is the only writer and the HTTP
//! facade the only reader. Fetching always happens outside the lock, so
//! readers never wait on a slow upstream.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pstl_core::Opportunity;
use pstl_fetch::{FetchError, Fetcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "pstl-cache";

/// One complete, immutable view of the cache. Cloning is an `Arc` bump.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub leads: Arc<Vec<Opportunity>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            leads: Arc::new(Vec::new()),
            last_update: None,
        }
    }

    pub fn count(&self) -> usize {
        self.leads.len()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Process-wide snapshot store. The critical section on both paths is a
/// pointer swap; the fetch that produced the new list already ran outside.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<Snapshot>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Snapshot::empty()),
        }
    }

    /// Current snapshot. A poisoned lock degrades to a best-effort stale
    /// read instead of propagating the writer's panic to every request.
    pub fn read(&self) -> Snapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically swap in a new complete list. Readers observe the old or
    /// the new snapshot, never a mix.
    pub fn replace(&self, leads: Vec<Opportunity>, refreshed_at: DateTime<Utc>) {
        let snapshot = Snapshot {
            leads: Arc::new(leads),
            last_update: Some(refreshed_at),
        };
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run one fetch and swap the result in. On failure or timeout the previous
/// snapshot and timestamp stay authoritative.
pub async fn refresh_once(
    cache: &CacheStore,
    fetcher: &dyn Fetcher,
    fetch_timeout: Duration,
) -> Result<usize, RefreshError> {
    let leads = tokio::time::timeout(fetch_timeout, fetcher.fetch())
        .await
        .map_err(|_| RefreshError::TimedOut(fetch_timeout))??;
    let count = leads.len();
    cache.replace(leads, Utc::now());
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub fetch_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            fetch_timeout: Duration::from_secs(120),
        }
    }
}

/// Outcome of a manual trigger. `Coalesced` means a refresh was already
/// running with another already queued behind it; the request is covered by
/// the queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Queued,
    Coalesced,
}

/// Cheap cloneable handle for requesting an out-of-band refresh.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    trigger_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Never blocks and never waits for the fetch. The trigger channel has
    /// capacity one: at most one refresh runs and at most one more queues.
    pub fn trigger(&self) -> TriggerOutcome {
        match self.trigger_tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(_) => TriggerOutcome::Coalesced,
        }
    }
}

/// Running scheduler task plus its shutdown control.
pub struct Refresher {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Refresher {
    pub fn handle(&self) -> RefreshHandle {
        RefreshHandle {
            trigger_tx: self.trigger_tx.clone(),
        }
    }

    /// Stop the loop and wait for it to exit. An in-flight fetch finishes
    /// (it is bounded by the fetch timeout) before the task returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Start the background refresh loop: one refresh per interval tick or
/// manual trigger, strictly sequential, failures logged and swallowed.
pub fn spawn_refresher(
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    config: RefreshConfig,
) -> Refresher {
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle_tx = trigger_tx.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately on creation; the initial load is the
        // caller's responsibility, so swallow that first tick.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                received = trigger_rx.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match refresh_once(&cache, fetcher.as_ref(), config.fetch_timeout).await {
                Ok(count) => info!(count, "leads cache refreshed"),
                Err(err) => warn!(error = %err, "refresh failed, keeping previous snapshot"),
            }
        }
    });

    Refresher {
        trigger_tx: handle_tx,
        shutdown_tx,
        task,
    }
}

/// Service configuration from environment variables, defaults matching the
/// deployment the dashboards expect.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub sources_path: PathBuf,
    pub user_agent: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("PSTL_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PSTL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            refresh_interval_secs: std::env::var("PSTL_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
            fetch_timeout_secs: std::env::var("PSTL_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            http_timeout_secs: std::env::var("PSTL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            sources_path: std::env::var("PSTL_SOURCES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            user_agent: std::env::var("PSTL_USER_AGENT")
                .unwrap_or_else(|_| "pstl-bot/0.1".to_string()),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pstl_core::{BudgetRange, Deadline, LeadDraft};
    use tokio::sync::Semaphore;

    fn lead(title: &str) -> Opportunity {
        LeadDraft {
            source_id: "test".to_string(),
            organization: "Government of Canada".to_string(),
            title: title.to_string(),
            description: "training".to_string(),
            source_url: "https://example.gc.ca".to_string(),
            contact: None,
            deadline: Deadline::Unknown,
            budget: BudgetRange::unknown(),
        }
        .annotate(chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap())
    }

    fn batch(title: &str, n: usize) -> Vec<Opportunity> {
        (0..n).map(|i| lead(&format!("{title} {i}"))).collect()
    }

    /// Scripted fetcher: pops the next canned response per call.
    struct ScriptedFetcher {
        script: Mutex<Vec<Result<Vec<Opportunity>, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Vec<Opportunity>, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Vec::new())
            } else {
                script.remove(0)
            }
        }
    }

    /// Fetcher that parks on a semaphore until the test releases it.
    struct GatedFetcher {
        gate: Arc<Semaphore>,
        started_tx: mpsc::UnboundedSender<()>,
        done_tx: mpsc::UnboundedSender<()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        fn name(&self) -> &str {
            "gated"
        }

        async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.started_tx.send(());
            self.gate
                .acquire()
                .await
                .expect("gate semaphore open")
                .forget();
            let _ = self.done_tx.send(());
            Ok(batch("gated", 1))
        }
    }

    #[test]
    fn empty_store_reads_empty_snapshot() {
        let cache = CacheStore::new();
        let snapshot = cache.read();
        assert_eq!(snapshot.count(), 0);
        assert!(snapshot.last_update.is_none());
    }

    #[test]
    fn replace_swaps_whole_list() {
        let cache = CacheStore::new();
        let ts = Utc::now();
        cache.replace(batch("alpha", 5), ts);
        let snapshot = cache.read();
        assert_eq!(snapshot.count(), 5);
        assert_eq!(snapshot.last_update, Some(ts));
    }

    #[test]
    fn concurrent_readers_never_see_a_mixed_snapshot() {
        let cache = Arc::new(CacheStore::new());
        cache.replace(batch("alpha", 3), Utc::now());

        let writer_cache = Arc::clone(&cache);
        let writer = std::thread::spawn(move || {
            for round in 0..200 {
                if round % 2 == 0 {
                    writer_cache.replace(batch("beta", 5), Utc::now());
                } else {
                    writer_cache.replace(batch("alpha", 3), Utc::now());
                }
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = cache.read();
                        let alpha = snapshot
                            .leads
                            .iter()
                            .filter(|l| l.title.starts_with("alpha"))
                            .count();
                        // every snapshot is homogeneous and complete
                        if alpha > 0 {
                            assert_eq!(alpha, 3);
                            assert_eq!(snapshot.count(), 3);
                        } else {
                            assert_eq!(snapshot.count(), 5);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot_and_timestamp() {
        let cache = CacheStore::new();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(batch("alpha", 5)),
            Err(FetchError::Parse("markup changed".to_string())),
        ]);

        refresh_once(&cache, &fetcher, Duration::from_secs(5))
            .await
            .unwrap();
        let before = cache.read();
        assert_eq!(before.count(), 5);

        let err = refresh_once(&cache, &fetcher, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Fetch(_)));

        let after = cache.read();
        assert_eq!(after.count(), 5);
        assert_eq!(after.last_update, before.last_update);
        assert_eq!(*after.leads, *before.leads);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_is_bounded_by_timeout() {
        struct HungFetcher;

        #[async_trait]
        impl Fetcher for HungFetcher {
            fn name(&self) -> &str {
                "hung"
            }

            async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }

        let cache = CacheStore::new();
        let err = refresh_once(&cache, &HungFetcher, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::TimedOut(_)));
        assert!(cache.read().last_update.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_tick_refreshes_cache() {
        let cache = Arc::new(CacheStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(batch("alpha", 3))]));
        let refresher = spawn_refresher(
            Arc::clone(&cache),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            RefreshConfig {
                interval: Duration::from_secs(60),
                fetch_timeout: Duration::from_secs(5),
            },
        );

        // let the loop park on its first select before advancing the clock
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.read().count(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_during_inflight_refresh_coalesce_to_one_queued_fetch() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(GatedFetcher {
            gate: Arc::clone(&gate),
            started_tx,
            done_tx,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(CacheStore::new());
        let refresher = spawn_refresher(
            Arc::clone(&cache),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            RefreshConfig {
                interval: Duration::from_secs(86_400),
                fetch_timeout: Duration::from_secs(86_400),
            },
        );
        let handle = refresher.handle();

        // trigger returns immediately even though the fetch will park
        assert_eq!(handle.trigger(), TriggerOutcome::Queued);
        started_rx.recv().await.expect("first fetch started");

        // refresh in flight: first extra trigger queues, the second coalesces
        assert_eq!(handle.trigger(), TriggerOutcome::Queued);
        assert_eq!(handle.trigger(), TriggerOutcome::Coalesced);
        assert_eq!(handle.trigger(), TriggerOutcome::Coalesced);

        gate.add_permits(1);
        done_rx.recv().await.expect("first fetch finished");
        started_rx.recv().await.expect("queued fetch started");
        gate.add_permits(1);
        done_rx.recv().await.expect("queued fetch finished");

        // exactly two fetches: the original plus the single queued one
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        refresher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let cache = Arc::new(CacheStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let refresher = spawn_refresher(
            Arc::clone(&cache),
            fetcher as Arc<dyn Fetcher>,
            RefreshConfig::default(),
        );
        refresher.shutdown().await;
    }
}
