//! Ratekeeper Service Binary
//!
//! Keeps registered currencies' exchange rates fresh from upstream.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_fx::{FrankfurterFetcher, InMemoryRateStore, RateStore, RefreshCoordinator};
use ratekeeper_service::config::log_directive;
use ratekeeper_service::{seed_currencies, RefreshScheduler, ServiceConfig, ServiceMetrics};
use ratekeeper_store::PgRateStore;

#[derive(Parser, Debug)]
#[command(name = "ratekeeper")]
#[command(about = "Exchange rate cache and refresh service")]
struct Args {
    /// Run a single refresh pass and exit
    #[arg(long)]
    once: bool,

    /// Register a currency at start-up (repeatable)
    #[arg(long = "add", value_name = "CODE")]
    add: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_directive(|name| {
            std::env::var(name).ok()
        })))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Ratekeeper");

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(anyhow::anyhow!("Configuration error: {}", e));
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store: Arc<dyn RateStore> = match &config.database_url {
        Some(url) => {
            let store = PgRateStore::connect(url, config.db_max_connections).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, rates are kept in memory only");
            Arc::new(InMemoryRateStore::new())
        }
    };

    let fetcher = FrankfurterFetcher::new(config.upstream_url.clone(), config.upstream_timeout)?;
    let coordinator = Arc::new(RefreshCoordinator::new(
        store,
        Arc::new(fetcher),
        config.refresh_config(),
    ));

    let warmed = coordinator.warm_cache().await?;
    let seeds: Vec<&String> = config.seed_currencies.iter().chain(args.add.iter()).collect();
    seed_currencies(&coordinator, &seeds).await;

    let scheduler = Arc::new(RefreshScheduler::new(
        coordinator.clone(),
        Arc::new(ServiceMetrics::new()),
        config.refresh_interval,
    ));

    if args.once {
        let report = scheduler.run_once().await;
        info!(
            refreshed = report.refreshed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Single refresh pass finished"
        );
        return Ok(());
    }

    // Set up graceful shutdown
    let scheduler_clone = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        scheduler_clone.stop();
    });

    info!(
        warmed,
        upstream = %config.upstream_url,
        interval_secs = config.refresh_interval.as_secs(),
        "Ratekeeper running"
    );

    scheduler.run().await;

    info!("Ratekeeper shutdown complete");
    Ok(())
}
