//! Metric watcher - scheduled anomaly detection for product metrics
//!
//! Every interval this binary pulls the trailing day of each configured
//! metric from ClickHouse, checks the latest bucket against its IQR bounds
//! and sends an alert with a chart for every breach.

use anyhow::{Context, Result};
use metric_watch_agent::{
    api,
    config::AgentConfig,
    scheduler::{LastReport, Scheduler, SchedulerConfig},
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watch_lib::{
    health::{components, HealthRegistry},
    notify::{LogNotifier, Notifier, PngChartRenderer, TelegramNotifier},
    observability::{StructuredLogger, WatchMetrics},
    pipeline::{DispatchMode, Pipeline},
    source::{ClickHouseSource, SeriesFetcher},
};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metric-watch");

    let config = AgentConfig::load()?;
    info!(instance = %config.instance, "Watcher configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = WatchMetrics::new();
    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(AGENT_VERSION, &config.detection.metrics);

    let source = ClickHouseSource::new(&config.clickhouse)
        .context("Failed to create ClickHouse source")?;
    let fetcher = SeriesFetcher::new(Arc::new(source), config.detection.bucket_width());

    let notifier: Arc<dyn Notifier> = match config.telegram {
        Some(ref telegram) => Arc::new(
            TelegramNotifier::new(telegram).context("Failed to create Telegram notifier")?,
        ),
        None => {
            warn!("No Telegram settings, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let channel = config
        .telegram
        .as_ref()
        .map(|t| t.chat_id.clone())
        .unwrap_or_else(|| "log".to_string());
    info!(notifier = notifier.name(), "Alert channel configured");

    let pipeline = Pipeline::new(
        fetcher,
        config.detection.classifier(),
        Arc::new(PngChartRenderer::default()),
        notifier,
        config
            .detection
            .pipeline_config(&channel, DispatchMode::Notify),
    )
    .with_health(health_registry.clone())
    .with_logger(logger.clone());

    let last_report: LastReport = Arc::new(RwLock::new(None));
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        last_report.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::new(
        Arc::new(pipeline),
        SchedulerConfig {
            interval: config.schedule.interval(),
            run_deadline: config.schedule.run_deadline(),
            job_retry: config.schedule.job_retry(),
        },
        last_report,
        health_registry.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Mark watcher as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    health_registry
        .set_unhealthy(components::SCHEDULER, "Shutting down")
        .await;
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
