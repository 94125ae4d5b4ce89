//! Periodic evaluation runs
//!
//! Runs start on wall-clock multiples of the configured interval, so a
//! 15-minute interval fires at :00, :15, :30 and :45. A run in which every
//! metric failed on an unreachable store is retried as a whole.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};
use watch_lib::{
    health::{components, HealthRegistry},
    Pipeline, RetryPolicy, RunReport,
};

/// Most recent run report, shared with the API
pub type LastReport = Arc<RwLock<Option<RunReport>>>;

/// Settings for the scheduler loop
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub run_deadline: Duration,
    pub job_retry: RetryPolicy,
}

/// Drives the pipeline on a fixed cadence
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
    last_report: LastReport,
    health: HealthRegistry,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        config: SchedulerConfig,
        last_report: LastReport,
        health: HealthRegistry,
    ) -> Self {
        Self {
            pipeline,
            config,
            last_report,
            health,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting evaluation scheduler"
        );

        loop {
            let now = Utc::now();
            let wait = until_next_tick(now, self.config.interval);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if !self.run_job(&mut shutdown).await {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down evaluation scheduler");
                    break;
                }
            }
        }
    }

    /// One scheduled job with retries; returns false when shut down meanwhile
    pub async fn run_job(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let retry = self.config.job_retry;
        let mut attempt = 0;

        loop {
            let deadline = Instant::now() + self.config.run_deadline;
            let report = self.pipeline.run(deadline).await;
            let unavailable = report.all_sources_unavailable();
            *self.last_report.write().await = Some(report);

            if !unavailable {
                self.health.set_healthy(components::SCHEDULER).await;
                return true;
            }

            if attempt >= retry.max_retries {
                warn!(
                    attempts = attempt + 1,
                    "Metric store unreachable, giving up until next tick"
                );
                self.health
                    .set_degraded(components::SCHEDULER, "last job exhausted its retries")
                    .await;
                return true;
            }

            attempt += 1;
            warn!(
                retry = attempt,
                delay_secs = retry.delay.as_secs(),
                "Metric store unreachable, retrying job"
            );

            tokio::select! {
                _ = tokio::time::sleep(retry.delay) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown during job retry delay");
                    return false;
                }
            }
        }
    }
}

/// Time from `now` to the next multiple of `interval` since the epoch
pub fn until_next_tick(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let next_ms = (now_ms.div_euclid(interval_ms) + 1) * interval_ms;
    Duration::from_millis((next_ms - now_ms) as u64)
}
