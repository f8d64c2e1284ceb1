//! Tesseract Bridge - cross-chain bridge transaction orchestrator
//!
//! Wires the orchestrator from configuration and runs the background loops:
//! monitoring reports, liquidity rebalancing, health checks and the metrics server.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use tesseract_bridge::config::Settings;
use tesseract_bridge::ledger::{InMemoryStore, PostgresStore, TransactionStore};
use tesseract_bridge::metrics::MetricsServer;
use tesseract_bridge::BridgeOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Tesseract Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration '{}' for {} chains",
        settings.bridge.instance_id,
        settings.enabled_chains().len()
    );

    // Transaction store
    let store: Arc<dyn TransactionStore> = match &settings.database {
        Some(database) => {
            let store = PostgresStore::new(database).await?;
            info!("Database connection established");
            store.run_migrations().await?;
            Arc::new(store)
        }
        None => {
            warn!("No database configured, transactions are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let orchestrator = Arc::new(BridgeOrchestrator::from_settings(&settings, store));
    info!("Bridge orchestrator initialized");

    // Monitoring window and periodic summary
    let monitoring = orchestrator.monitoring();
    monitoring.start().await;
    let reporter_handle = monitoring
        .clone()
        .spawn_reporter(Duration::from_secs(settings.monitoring.report_interval_secs));

    // Liquidity rebalancing
    let optimizer_handle = tokio::spawn({
        let liquidity = orchestrator.liquidity();
        let every = Duration::from_secs(settings.liquidity.optimize_interval_secs);
        async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let report = liquidity.optimize_allocation().await;
                if report.pools_rebalanced > 0 {
                    info!(
                        "Rebalanced {}/{} pools, moved {}",
                        report.pools_rebalanced, report.pools_checked, report.total_moved
                    );
                } else {
                    debug!("Liquidity allocation already on target");
                }
            }
        }
    });

    // Status change log
    let status_log_handle = tokio::spawn({
        let mut updates = orchestrator.subscriptions().subscribe_all();
        async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        debug!(tx_id = %update.tx_id, status = %update.status, "Status update");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Status log lagged, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port, monitoring.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let every = settings.monitoring.report_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(every)).await;

                let report = orchestrator.health().await;
                if !report.is_serving() {
                    warn!(
                        "Bridge unhealthy: success rate {:.2} over {} transactions",
                        report.success_rate, report.total_transactions
                    );
                }
            }
        }
    });

    info!("Tesseract Bridge is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    monitoring.stop().await;
    let snapshot = monitoring.metrics().await;
    info!(
        "Processed {} transactions ({} successful, {} failed)",
        snapshot.total_transactions,
        snapshot.successful_transactions,
        snapshot.failed_transactions
    );

    // Abort background tasks
    reporter_handle.abort();
    optimizer_handle.abort();
    status_log_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Tesseract Bridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tesseract_bridge=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
