//! Axum + Askama HTTP facade over the leads cache.
//!
//! Every endpoint is a pure read of the current [`CacheStore`] snapshot;
//! `/api/refresh` only hands a trigger to the background scheduler and
//! returns immediately.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use pstl_cache::{CacheStore, RefreshHandle, Snapshot, TriggerOutcome};
use pstl_core::{DashboardStats, Opportunity};
use serde::Deserialize;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "pstl-web";

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheStore>,
    pub refresh: RefreshHandle,
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(
        cache: Arc<CacheStore>,
        refresh: RefreshHandle,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            refresh,
            workspace_root: workspace_root.into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LeadsQuery {
    #[serde(rename = "type")]
    pub org_type: Option<String>,
    pub category: Option<String>,
    pub tier: Option<String>,
    pub search: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/leads", get(leads_handler))
        .route("/api/refresh", get(refresh_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve<S>(state: AppState, bind: &str, shutdown: S) -> anyhow::Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(bind, "dashboard listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// The original dashboards rendered timestamps as local wall-clock strings;
/// clients key off null to detect "never refreshed".
fn last_update_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn filter_leads(leads: &[Opportunity], query: &LeadsQuery) -> Vec<Opportunity> {
    let search = query
        .search
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    leads
        .iter()
        .filter(|lead| {
            query.org_type.as_deref().map_or(true, |t| {
                t == "all" || lead.org_level.label().eq_ignore_ascii_case(t)
            }) && query.category.as_deref().map_or(true, |c| {
                c == "all" || lead.category.label().eq_ignore_ascii_case(c)
            }) && query
                .tier
                .as_deref()
                .map_or(true, |t| t == "all" || lead.tier.matches_filter(t))
                && search.as_deref().map_or(true, |needle| {
                    format!(
                        "{} {} {}",
                        lead.organization, lead.title, lead.description
                    )
                    .to_ascii_lowercase()
                    .contains(needle)
                })
        })
        .cloned()
        .collect()
}

async fn leads_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeadsQuery>,
) -> Response {
    let snapshot = state.cache.read();
    let filtered = filter_leads(&snapshot.leads, &query);
    Json(serde_json::json!({
        "leads": filtered,
        "count": filtered.len(),
        "total": snapshot.count(),
        "last_update": last_update_text(snapshot.last_update),
    }))
    .into_response()
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    let outcome = state.refresh.trigger();
    let snapshot = state.cache.read();
    let message = match outcome {
        TriggerOutcome::Queued => "refresh queued",
        TriggerOutcome::Coalesced => "refresh already pending",
    };
    Json(serde_json::json!({
        "status": "success",
        "message": message,
        "count": snapshot.count(),
        "last_update": last_update_text(snapshot.last_update),
    }))
    .into_response()
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.cache.read();
    let stats = DashboardStats::from_leads(&snapshot.leads);
    Json(serde_json::json!({
        "stats": stats,
        "last_update": last_update_text(snapshot.last_update),
    }))
    .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.cache.read();
    Json(serde_json::json!({
        "status": "healthy",
        "leads_count": snapshot.count(),
        "last_update": last_update_text(snapshot.last_update),
    }))
    .into_response()
}

#[derive(Debug, Clone)]
struct LeadRow {
    organization: String,
    title: String,
    url: String,
    tier: String,
    deadline: String,
    budget: String,
    win_probability: u8,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total_leads: usize,
    urgent_leads: usize,
    high_priority_leads: usize,
    pipeline: String,
    avg_win: String,
    last_update: String,
    rows: Vec<LeadRow>,
}

fn format_pipeline(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.0}K", value / 1_000.0)
    } else {
        format!("${:.0}", value)
    }
}

fn index_rows(snapshot: &Snapshot) -> Vec<LeadRow> {
    snapshot
        .leads
        .iter()
        .map(|lead| LeadRow {
            organization: lead.organization.clone(),
            title: lead.title.clone(),
            url: lead.source_url.clone(),
            tier: lead.tier.label().to_string(),
            deadline: lead
                .deadline
                .as_iso()
                .unwrap_or_else(|| "unknown".to_string()),
            budget: lead.budget.to_string(),
            win_probability: lead.insights.win_probability,
        })
        .collect()
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.cache.read();
    let stats = DashboardStats::from_leads(&snapshot.leads);
    let tpl = IndexTemplate {
        total_leads: stats.total_leads,
        urgent_leads: stats.urgent_leads,
        high_priority_leads: stats.high_priority_leads,
        pipeline: format_pipeline(stats.total_pipeline_value),
        avg_win: format!("{:.0}", stats.avg_win_probability),
        last_update: last_update_text(snapshot.last_update)
            .unwrap_or_else(|| "never".to_string()),
        rows: index_rows(&snapshot),
    };
    render_html(tpl)
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Html("/* missing app.css */".to_string()),
        )
            .into_response(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("Server error: {err}")),
        )
            .into_response(),
    }
}
