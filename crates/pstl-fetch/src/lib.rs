//! Lead source contracts + swappable fetch strategies.
//!
//! A [`Fetcher`] produces a fresh batch of annotated [`Opportunity`] records.
//! Concrete strategies: [`CuratedFetcher`] (deterministic built-in listings)
//! and [`TenderScraper`] (live HTML listing pages). [`CompositeFetcher`]
//! aggregates every enabled source from the registry, tolerating individual
//! source failures.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use pstl_core::{BudgetRange, Deadline, LeadDraft, Opportunity};
use scraper::{Html, Selector};
use serde::Deserialize;
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "pstl-fetch";

/// Titles this close (normalized Jaro-Winkler) collapse into one record.
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.95;

/// Relevance vocabulary for procurement listings, English and French.
pub const TRAINING_KEYWORDS: &[&str] = &[
    "training",
    "workshop",
    "professional development",
    "learning",
    "course",
    "certification",
    "skills development",
    "capacity building",
    "formation",
    "développement professionnel",
    "apprentissage",
];

pub fn is_training_related(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TRAINING_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("{0}")]
    Parse(String),
    #[error("no enabled sources in registry")]
    NoSources,
    #[error("all {0} enabled sources failed")]
    AllSourcesFailed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: reqwest::StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: "pstl-bot/0.1".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Thin reqwest wrapper: bounded timeout, retry classification, exponential
/// capped backoff. One upstream page at a time; the refresh loop is the only
/// caller.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn get_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        debug!(source_id, url, "fetching listing page");

        let mut last_request_error: Option<reqwest::Error> = None;
        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop always records a request error"),
        ))
    }
}

/// Anything that can produce a fresh batch of leads. The cache layer only
/// ever sees this trait; the strategy behind it is a configuration detail.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError>;
}

/// One built-in listing. Deadlines are relative so curated data never ages
/// into the past.
#[derive(Debug, Clone)]
pub struct CuratedListing {
    pub organization: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub url: &'static str,
    pub contact: Option<&'static str>,
    pub deadline_days_out: Option<i64>,
    pub budget: &'static str,
}

/// Deterministic fetcher over a fixed table of listings.
#[derive(Debug, Clone)]
pub struct CuratedFetcher {
    source_id: String,
    listings: Vec<CuratedListing>,
}

impl CuratedFetcher {
    pub fn new(source_id: impl Into<String>, listings: Vec<CuratedListing>) -> Self {
        Self {
            source_id: source_id.into(),
            listings,
        }
    }

    fn drafts(&self, today: NaiveDate) -> Vec<LeadDraft> {
        self.listings
            .iter()
            .map(|listing| LeadDraft {
                source_id: self.source_id.clone(),
                organization: listing.organization.to_string(),
                title: listing.title.to_string(),
                description: listing.description.to_string(),
                source_url: listing.url.to_string(),
                contact: listing.contact.map(ToString::to_string),
                deadline: match listing.deadline_days_out {
                    Some(days) => Deadline::Date(today + ChronoDuration::days(days)),
                    None => Deadline::Unknown,
                },
                budget: BudgetRange::parse(listing.budget),
            })
            .collect()
    }
}

#[async_trait]
impl Fetcher for CuratedFetcher {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
        let today = Utc::now().date_naive();
        Ok(self
            .drafts(today)
            .into_iter()
            .map(|draft| draft.annotate(today))
            .collect())
    }
}

/// Gated tender portals we cannot crawl; listings entered by hand.
pub fn merx_sample_listings() -> Vec<CuratedListing> {
    vec![
        CuratedListing {
            organization: "Ontario Ministry of Health",
            title: "Healthcare Professional Training Services RFP",
            description: "Province-wide clinical upskilling program for healthcare staff, \
                          virtual and in-person delivery.",
            url: "https://www.merx.com/notice/healthcare-training-rfp",
            contact: Some("procurement@health.gov.on.ca"),
            deadline_days_out: Some(21),
            budget: "$500K - $1M",
        },
        CuratedListing {
            organization: "City of Toronto",
            title: "Diversity & Inclusion Training for Municipal Staff",
            description: "Mandatory equity and inclusion training for all municipal divisions.",
            url: "https://www.merx.com/notice/toronto-dei-training",
            contact: Some("purchasing@toronto.ca"),
            deadline_days_out: Some(14),
            budget: "Up to $1M",
        },
    ]
}

/// Flagship federal/provincial/municipal programs announced outside the
/// tender portals.
pub fn program_announcement_listings() -> Vec<CuratedListing> {
    vec![
        CuratedListing {
            organization: "Government of Canada - Treasury Board Secretariat",
            title: "Digital Transformation Excellence Program",
            description: "Comprehensive training initiative to upskill federal employees in AI, \
                          data analytics, and cloud technologies. Part of the GC Digital \
                          Ambition strategy.",
            url: "https://www.canada.ca/en/treasury-board-secretariat/digital-transformation",
            contact: Some("digital-excellence@tbs-sct.gc.ca"),
            deadline_days_out: Some(60),
            budget: "$15M - $20M",
        },
        CuratedListing {
            organization: "Ontario Public Service",
            title: "Province-Wide AODA Compliance Training Initiative",
            description: "Mandatory accessibility training for OPS employees. Multi-year \
                          program with annual refresh requirements.",
            url: "https://www.ontario.ca/accessibility-training",
            contact: Some("accessibility.training@ontario.ca"),
            deadline_days_out: Some(45),
            budget: "$8M - $12M",
        },
        CuratedListing {
            organization: "Indigenous Services Canada",
            title: "Indigenous Leadership & Governance Training Program",
            description: "Capacity building initiative for Indigenous governments and \
                          organizations. Focus on governance, financial management, and \
                          service delivery.",
            url: "https://www.canada.ca/indigenous-services/capacity-building",
            contact: Some("capacity.building@sac-isc.gc.ca"),
            deadline_days_out: Some(105),
            budget: "$5M - $8M",
        },
        CuratedListing {
            organization: "Canadian Digital Service",
            title: "AI Ethics and Implementation Training for Public Servants",
            description: "Training program on responsible AI use in government. Covers ethics, \
                          bias mitigation, and practical implementation.",
            url: "https://digital.canada.ca/ai-training",
            contact: Some("ai-training@cds-snc.ca"),
            deadline_days_out: Some(120),
            budget: "$3M - $5M",
        },
        CuratedListing {
            organization: "City of Toronto",
            title: "TransformTO Climate Action Training",
            description: "Comprehensive sustainability training for city employees. Part of \
                          net-zero strategy implementation.",
            url: "https://www.toronto.ca/transformto-training",
            contact: Some("transformto@toronto.ca"),
            deadline_days_out: Some(75),
            budget: "$2M - $4M",
        },
    ]
}

/// Live strategy: per-keyword searches against public tender listing pages.
/// One bad keyword or page never aborts the sweep; failures are logged and
/// skipped.
pub struct TenderScraper {
    source_id: String,
    organization: String,
    listing_urls: Vec<String>,
    keywords: Vec<String>,
    http: Arc<HttpClient>,
}

impl TenderScraper {
    pub fn new(
        source_id: impl Into<String>,
        organization: impl Into<String>,
        listing_urls: Vec<String>,
        keywords: Vec<String>,
        http: Arc<HttpClient>,
    ) -> Self {
        let keywords = if keywords.is_empty() {
            TRAINING_KEYWORDS[..3].iter().map(ToString::to_string).collect()
        } else {
            keywords
        };
        Self {
            source_id: source_id.into(),
            organization: organization.into(),
            listing_urls,
            keywords,
            http,
        }
    }

    fn search_url(listing_url: &str, keyword: &str) -> String {
        let encoded = keyword.replace(' ', "+");
        if listing_url.contains('?') {
            format!("{listing_url}&keywords={encoded}")
        } else {
            format!("{listing_url}?keywords={encoded}")
        }
    }
}

#[async_trait]
impl Fetcher for TenderScraper {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
        let today = Utc::now().date_naive();
        let mut drafts = Vec::new();
        let mut failures = 0usize;
        let mut attempts = 0usize;

        for listing_url in &self.listing_urls {
            for keyword in &self.keywords {
                attempts += 1;
                let url = Self::search_url(listing_url, keyword);
                let html = match self.http.get_text(&self.source_id, &url).await {
                    Ok(html) => html,
                    Err(err) => {
                        warn!(source_id = %self.source_id, keyword = %keyword, error = %err,
                              "search page fetch failed, skipping keyword");
                        failures += 1;
                        continue;
                    }
                };
                match parse_listing_html(&html, &self.source_id, &self.organization, listing_url) {
                    Ok(mut parsed) => drafts.append(&mut parsed),
                    Err(err) => {
                        warn!(source_id = %self.source_id, keyword = %keyword, error = %err,
                              "search page parse failed, skipping keyword");
                        failures += 1;
                    }
                }
            }
        }

        if attempts > 0 && failures == attempts {
            return Err(FetchError::Parse(format!(
                "every search page failed for source {}",
                self.source_id
            )));
        }

        Ok(drafts
            .into_iter()
            .map(|draft| draft.annotate(today))
            .collect())
    }
}

/// Extract lead drafts from a tender search-results page. Rows are
/// `div.search-result` blocks with an `h3.title` heading and a detail link;
/// deadline and budget come from whatever free text surrounds them.
pub fn parse_listing_html(
    html: &str,
    source_id: &str,
    organization: &str,
    base_url: &str,
) -> Result<Vec<LeadDraft>, FetchError> {
    let document = Html::parse_document(html);
    let row_sel = parse_selector("div.search-result")?;
    let title_sel = parse_selector("h3.title")?;
    let link_sel = parse_selector("a[href]")?;
    let summary_sel = parse_selector(".summary")?;

    let mut drafts = Vec::new();
    for row in document.select(&row_sel) {
        let row_text = row.text().collect::<String>();
        let Some(title) = row
            .select(&title_sel)
            .next()
            .and_then(|n| text_or_none(n.text().collect::<String>()))
        else {
            continue;
        };
        if !is_training_related(&format!("{title} {row_text}")) {
            continue;
        }
        let href = row
            .select(&link_sel)
            .next()
            .and_then(|n| n.value().attr("href"))
            .unwrap_or_default();
        let description = row
            .select(&summary_sel)
            .next()
            .and_then(|n| text_or_none(n.text().collect::<String>()))
            .unwrap_or_else(|| collapse_whitespace(&row_text));
        drafts.push(LeadDraft {
            source_id: source_id.to_string(),
            organization: organization.to_string(),
            title,
            description,
            source_url: join_url(base_url, href),
            contact: None,
            deadline: Deadline::parse(&row_text),
            budget: BudgetRange::parse(&row_text),
        });
    }
    Ok(drafts)
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|e| FetchError::Parse(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a possibly-relative href against the listing page's origin.
pub fn join_url(base_url: &str, href: &str) -> String {
    if href.is_empty() {
        return base_url.to_string();
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let origin = match base_url.find("://") {
        Some(scheme_end) => match base_url[scheme_end + 3..].find('/') {
            Some(path_start) => &base_url[..scheme_end + 3 + path_start],
            None => base_url,
        },
        None => base_url,
    };
    if href.starts_with('/') {
        format!("{origin}{href}")
    } else {
        format!("{origin}/{href}")
    }
}

/// Collapse near-duplicate titles across sources, keeping the first record.
/// The same RFP routinely shows up under several keyword searches.
pub fn collapse_near_duplicates(leads: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut kept: Vec<Opportunity> = Vec::with_capacity(leads.len());
    let mut kept_keys: Vec<String> = Vec::with_capacity(leads.len());
    for lead in leads {
        let key = pstl_core::normalize_title_key(&lead.title);
        let duplicate = kept_keys
            .iter()
            .any(|existing| jaro_winkler(existing, &key) >= NEAR_DUPLICATE_THRESHOLD);
        if !duplicate {
            kept_keys.push(key);
            kept.push(lead);
        }
    }
    kept
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub mode: SourceMode,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Curated,
    Scrape,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Map a registry entry onto a concrete strategy. Curated source ids must be
/// ones we ship listings for.
pub fn fetcher_for_source(
    config: &SourceConfig,
    http: Arc<HttpClient>,
) -> anyhow::Result<Box<dyn Fetcher>> {
    match config.mode {
        SourceMode::Curated => {
            let listings = match config.source_id.as_str() {
                "merx" => merx_sample_listings(),
                "program-announcements" => program_announcement_listings(),
                other => anyhow::bail!("no curated listings registered for source {other}"),
            };
            Ok(Box::new(CuratedFetcher::new(&config.source_id, listings)))
        }
        SourceMode::Scrape => Ok(Box::new(TenderScraper::new(
            &config.source_id,
            config
                .organization
                .clone()
                .unwrap_or_else(|| "Government of Canada".to_string()),
            config.listing_urls.clone(),
            config.keywords.clone(),
            http,
        ))),
    }
}

/// Aggregates all enabled sources. A failing source is logged and skipped;
/// only a total wipeout surfaces as an error so the cache keeps its previous
/// snapshot.
pub struct CompositeFetcher {
    sources: Vec<Box<dyn Fetcher>>,
}

impl CompositeFetcher {
    pub fn new(sources: Vec<Box<dyn Fetcher>>) -> Self {
        Self { sources }
    }

    pub fn from_registry(registry: &SourceRegistry, http: Arc<HttpClient>) -> anyhow::Result<Self> {
        let mut sources: Vec<Box<dyn Fetcher>> = Vec::new();
        for config in registry.sources.iter().filter(|s| s.enabled) {
            let fetcher = fetcher_for_source(config, Arc::clone(&http))
                .with_context(|| format!("configuring source {}", config.source_id))?;
            sources.push(fetcher);
        }
        Ok(Self::new(sources))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

#[async_trait]
impl Fetcher for CompositeFetcher {
    fn name(&self) -> &str {
        "composite"
    }

    async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
        if self.sources.is_empty() {
            return Err(FetchError::NoSources);
        }
        let mut all = Vec::new();
        let mut failed = 0usize;
        for source in &self.sources {
            match source.fetch().await {
                Ok(mut leads) => all.append(&mut leads),
                Err(err) => {
                    warn!(source = source.name(), error = %err, "source fetch failed");
                    failed += 1;
                }
            }
        }
        if failed == self.sources.len() {
            return Err(FetchError::AllSourcesFailed(failed));
        }
        Ok(collapse_near_duplicates(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pstl_core::Tier;

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <div class="search-result">
            <h3 class="title"><a href="/tender/101">Cybersecurity Training for Analysts</a></h3>
            <p class="summary">Security awareness and incident response training.</p>
            <span>Closing 2030-04-01. Budget $500K - $1M.</span>
          </div>
          <div class="search-result">
            <h3 class="title"><a href="/tender/102">Office Furniture Supply</a></h3>
            <p class="summary">Desks and chairs for regional offices.</p>
          </div>
          <div class="search-result">
            <h3 class="title"><a href="https://other.example/tender/103">Leadership Course Delivery</a></h3>
            <p class="summary">Management fundamentals course for supervisors.</p>
            <span>Deadline to be announced.</span>
          </div>
        </body></html>"#;

    #[test]
    fn parse_listing_keeps_only_training_related_rows() {
        let drafts = parse_listing_html(
            SEARCH_PAGE,
            "canadabuys",
            "Government of Canada",
            "https://canadabuys.canada.ca/en/tender-opportunities",
        )
        .unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].title, "Cybersecurity Training for Analysts");
        assert_eq!(
            drafts[0].source_url,
            "https://canadabuys.canada.ca/tender/101"
        );
        assert_eq!(
            drafts[0].deadline,
            Deadline::Date(chrono::NaiveDate::from_ymd_opt(2030, 4, 1).unwrap())
        );
        assert_eq!(drafts[0].budget.max, Some(1_000_000.0));
        // absolute hrefs pass through untouched
        assert_eq!(drafts[1].source_url, "https://other.example/tender/103");
        assert_eq!(drafts[1].deadline, Deadline::Unknown);
    }

    #[test]
    fn join_url_resolves_relative_and_absolute() {
        assert_eq!(
            join_url("https://example.gc.ca/en/search", "/tender/9"),
            "https://example.gc.ca/tender/9"
        );
        assert_eq!(
            join_url("https://example.gc.ca/en/search", "https://b.ca/x"),
            "https://b.ca/x"
        );
        assert_eq!(
            join_url("https://example.gc.ca/en/search", ""),
            "https://example.gc.ca/en/search"
        );
    }

    #[test]
    fn relevance_filter_matches_french_vocabulary() {
        assert!(is_training_related("Programme de formation continue"));
        assert!(!is_training_related("Snow removal services"));
    }

    #[tokio::test]
    async fn curated_fetcher_is_deterministic_and_annotated() {
        let fetcher = CuratedFetcher::new("program-announcements", program_announcement_listings());
        let first = fetcher.fetch().await.unwrap();
        let second = fetcher.fetch().await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        let flagship = &first[0];
        assert_eq!(flagship.budget.max, Some(20_000_000.0));
        assert_eq!(flagship.tier, Tier::Urgent);
        assert_eq!(flagship.source_id, "program-announcements");
    }

    #[test]
    fn near_duplicate_titles_collapse_keeping_first() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let mk = |title: &str| {
            LeadDraft {
                source_id: "canadabuys".to_string(),
                organization: "Government of Canada".to_string(),
                title: title.to_string(),
                description: "training".to_string(),
                source_url: "https://example.gc.ca".to_string(),
                contact: None,
                deadline: Deadline::Unknown,
                budget: BudgetRange::unknown(),
            }
            .annotate(today)
        };
        let leads = vec![
            mk("AI Data Contributor Training"),
            mk("AI Data Contributer Training"),
            mk("Search Relevance Rater Onboarding"),
        ];
        let collapsed = collapse_near_duplicates(leads);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].title, "AI Data Contributor Training");
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self) -> Result<Vec<Opportunity>, FetchError> {
            Err(FetchError::Parse("upstream changed markup".to_string()))
        }
    }

    #[tokio::test]
    async fn composite_tolerates_partial_failure() {
        let composite = CompositeFetcher::new(vec![
            Box::new(FailingFetcher),
            Box::new(CuratedFetcher::new("merx", merx_sample_listings())),
        ]);
        let leads = composite.fetch().await.unwrap();
        assert_eq!(leads.len(), 2);
    }

    #[tokio::test]
    async fn composite_errors_when_every_source_fails() {
        let composite =
            CompositeFetcher::new(vec![Box::new(FailingFetcher), Box::new(FailingFetcher)]);
        let err = composite.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::AllSourcesFailed(2)));
    }

    #[tokio::test]
    async fn composite_with_no_sources_errors() {
        let composite = CompositeFetcher::new(vec![]);
        assert!(matches!(
            composite.fetch().await.unwrap_err(),
            FetchError::NoSources
        ));
    }

    #[test]
    fn registry_yaml_parses_modes_and_defaults() {
        let yaml = r#"
sources:
  - source_id: canadabuys
    display_name: CanadaBuys
    enabled: true
    mode: scrape
    listing_urls:
      - https://canadabuys.canada.ca/en/tender-opportunities
    keywords:
      - training
  - source_id: merx
    display_name: MERX
    enabled: false
    mode: curated
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registry.sources.len(), 2);
        assert_eq!(registry.sources[0].mode, SourceMode::Scrape);
        assert!(registry.sources[1].listing_urls.is_empty());
        assert!(registry.sources[1].organization.is_none());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }
}
