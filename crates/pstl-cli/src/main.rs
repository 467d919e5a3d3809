use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pstl_cache::{refresh_once, spawn_refresher, AppConfig, CacheStore};
use pstl_fetch::{CompositeFetcher, Fetcher, HttpClient, HttpClientConfig, SourceRegistry};
use pstl_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pstl")]
#[command(about = "Public Sector Training Leads service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the dashboard and the background refresh loop
    Serve,
    /// Fetch all enabled sources once and print a summary
    Fetch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .try_init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Fetch => fetch(config).await,
    }
}

fn build_fetcher(config: &AppConfig) -> Result<Arc<dyn Fetcher>> {
    let registry = SourceRegistry::load(&config.sources_path)?;
    let http = Arc::new(HttpClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: config.user_agent.clone(),
        ..Default::default()
    })?);
    let composite = CompositeFetcher::from_registry(&registry, http)?;
    info!(sources = composite.source_count(), "source registry loaded");
    Ok(Arc::new(composite))
}

async fn fetch(config: AppConfig) -> Result<()> {
    let fetcher = build_fetcher(&config)?;
    let leads = fetcher.fetch().await.context("fetching leads")?;
    let stats = pstl_core::DashboardStats::from_leads(&leads);
    println!(
        "fetched {} leads: urgent={} high_priority={} pipeline=${:.0}",
        stats.total_leads, stats.urgent_leads, stats.high_priority_leads, stats.total_pipeline_value
    );
    for lead in &leads {
        println!("- [{}] {} ({})", lead.tier, lead.title, lead.organization);
    }
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let fetcher = build_fetcher(&config)?;
    let cache = Arc::new(CacheStore::new());
    let refresh_config = config.refresh_config();

    // Initial load before accepting traffic; a failure here serves an empty
    // dashboard rather than aborting, the same as any later failed refresh.
    match refresh_once(&cache, fetcher.as_ref(), refresh_config.fetch_timeout).await {
        Ok(count) => info!(count, "initial leads load complete"),
        Err(err) => warn!(error = %err, "initial load failed, starting with an empty cache"),
    }

    let refresher = spawn_refresher(Arc::clone(&cache), Arc::clone(&fetcher), refresh_config);
    let state = AppState::new(Arc::clone(&cache), refresher.handle(), ".");
    let bind = format!("{}:{}", config.bind_addr, config.port);
    pstl_web::serve(state, &bind, shutdown_signal()).await?;
    refresher.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}
