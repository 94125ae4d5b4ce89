//! Evaluation run orchestration
//!
//! One run fetches and classifies every configured metric concurrently,
//! then dispatches alerts for the anomalous ones. Failures stay inside
//! the metric that produced them; the run always returns a [`RunReport`].

mod report;
mod retry;


pub use report::{
    DeliveryOutcome, DeliveryState, FailureStage, MetricOutcome, MetricStatus, RunReport,
    RunSummary,
};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::anomaly::{compose_alert, AnomalyClassifier, AnomalyEvent, Verdict};
use crate::error::SourceError;
use crate::health::{components, HealthRegistry};
use crate::models::{MetricId, TimeSeries, DEFAULT_LOOKBACK};
use crate::notify::{ChartRenderer, Notifier};
use crate::observability::{StructuredLogger, WatchMetrics};
use crate::source::SeriesFetcher;

/// Whether anomalies are delivered or only reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Notify,
    DryRun,
}

/// Per-run settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Metrics evaluated each run, in report order
    pub metrics: Vec<MetricId>,
    pub lookback: Duration,
    /// Chat channel alerts are sent to
    pub channel: String,
    pub delivery_retry: RetryPolicy,
    pub mode: DispatchMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metrics: MetricId::DEFAULT_SET.to_vec(),
            lookback: DEFAULT_LOOKBACK,
            channel: String::new(),
            delivery_retry: RetryPolicy::default(),
            mode: DispatchMode::Notify,
        }
    }
}

/// Detection result for one metric, before dispatch
enum Detection {
    Classified { series: TimeSeries, verdict: Verdict },
    FetchFailed(SourceError),
    TaskFailed(String),
    TimedOut,
}

/// Runs the fetch, classify and alert pipeline
pub struct Pipeline {
    fetcher: SeriesFetcher,
    classifier: AnomalyClassifier,
    renderer: Arc<dyn ChartRenderer>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
    metrics: WatchMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Pipeline {
    pub fn new(
        fetcher: SeriesFetcher,
        classifier: AnomalyClassifier,
        renderer: Arc<dyn ChartRenderer>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            renderer,
            notifier,
            config,
            metrics: WatchMetrics::new(),
            logger: StructuredLogger::new("metric-watch"),
            health: None,
        }
    }

    /// Report component health to `registry` after each run
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one evaluation pass; detection must finish by `deadline`
    pub async fn run(&self, deadline: Instant) -> RunReport {
        self.run_at(Utc::now(), deadline).await
    }

    /// Run as if the current time were `now`
    pub async fn run_at(&self, now: DateTime<Utc>, deadline: Instant) -> RunReport {
        let started = std::time::Instant::now();
        let started_at = Utc::now();
        self.logger.log_run_started(&self.config.metrics);

        let detections = self.detect(now, deadline).await;

        let mut outcomes = Vec::with_capacity(detections.len());
        let mut source_failures = 0;
        let mut sends = 0;
        let mut send_failures = 0;

        for (metric, detection) in detections {
            let status = match detection {
                Detection::Classified { series, verdict } => match verdict {
                    Verdict::Normal { observed, bounds } => MetricStatus::Normal {
                        observed,
                        lower: bounds.lower,
                        upper: bounds.upper,
                    },
                    Verdict::InsufficientHistory => {
                        self.logger.log_metric_skipped(
                            metric,
                            "estimate",
                            "insufficient history for bounds",
                        );
                        MetricStatus::NoVerdict {
                            points: series.len(),
                        }
                    }
                    Verdict::Anomalous(event) => {
                        self.logger.log_anomaly(&event);
                        self.metrics.inc_anomalies_detected(metric);
                        let delivery = self.dispatch(&series, &event).await;
                        // render failures do not count against the notifier
                        for state in [&delivery.text, &delivery.chart] {
                            match state {
                                DeliveryState::Sent => sends += 1,
                                DeliveryState::Failed { .. } => {
                                    sends += 1;
                                    send_failures += 1;
                                }
                                DeliveryState::Skipped | DeliveryState::NotRendered { .. } => {}
                            }
                        }
                        MetricStatus::Anomalous { event, delivery }
                    }
                },
                Detection::FetchFailed(e) => {
                    source_failures += 1;
                    self.metrics.inc_fetch_errors(metric);
                    self.logger
                        .log_metric_skipped(metric, "fetch", &e.to_string());
                    MetricStatus::Failed {
                        stage: FailureStage::Fetch,
                        error: e.to_string(),
                        unavailable: e.is_unavailable(),
                    }
                }
                Detection::TaskFailed(error) => {
                    self.logger.log_metric_skipped(metric, "task", &error);
                    MetricStatus::Failed {
                        stage: FailureStage::Task,
                        error,
                        unavailable: false,
                    }
                }
                Detection::TimedOut => {
                    source_failures += 1;
                    self.logger
                        .log_metric_skipped(metric, "fetch", "run deadline exceeded");
                    MetricStatus::TimedOut
                }
            };

            self.metrics.inc_evaluated(metric, status.label());
            outcomes.push(MetricOutcome { metric, status });
        }

        if let Some(ref health) = self.health {
            health
                .record_failures(components::METRIC_SOURCE, source_failures, outcomes.len())
                .await;
            if sends > 0 {
                health
                    .record_failures(components::NOTIFIER, send_failures, sends)
                    .await;
            }
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        self.metrics
            .observe_run_latency(started.elapsed().as_secs_f64());
        self.metrics
            .set_last_run_timestamp(report.finished_at.timestamp());
        self.logger.log_run_completed(&report);
        report
    }

    /// Fetch and classify every metric concurrently, in configured order
    async fn detect(&self, now: DateTime<Utc>, deadline: Instant) -> Vec<(MetricId, Detection)> {
        let handles: Vec<_> = self
            .config
            .metrics
            .iter()
            .map(|&metric| {
                let fetcher = self.fetcher.clone();
                let classifier = self.classifier;
                let lookback = self.config.lookback;
                let handle = tokio::spawn(async move {
                    let fetched =
                        tokio::time::timeout_at(deadline, fetcher.fetch_at(metric, lookback, now))
                            .await;
                    match fetched {
                        Ok(Ok(series)) => {
                            let verdict = classifier.classify(&series);
                            debug!(metric = %metric, anomaly = verdict.is_anomaly(), "Classified latest bucket");
                            Detection::Classified { series, verdict }
                        }
                        Ok(Err(e)) => Detection::FetchFailed(e),
                        Err(_) => Detection::TimedOut,
                    }
                });
                (metric, handle)
            })
            .collect();

        let mut detections = Vec::with_capacity(handles.len());
        for (metric, handle) in handles {
            let detection = handle
                .await
                .unwrap_or_else(|e| Detection::TaskFailed(e.to_string()));
            detections.push((metric, detection));
        }
        detections
    }

    /// Render the chart and deliver text and chart for one anomaly
    async fn dispatch(&self, series: &TimeSeries, event: &AnomalyEvent) -> DeliveryOutcome {
        if self.config.mode == DispatchMode::DryRun {
            return DeliveryOutcome::skipped();
        }

        let metric = event.metric;
        let retry = self.config.delivery_retry;
        let channel = self.config.channel.as_str();
        let renderer = self.renderer.as_ref();
        let notifier = self.notifier.as_ref();
        let band = self.classifier.estimator().band(series);
        let band = band.as_slice();
        let text = compose_alert(metric, event);
        let text = text.as_str();

        let chart = retry
            .run("render", move || renderer.render(series, band))
            .await;

        let text_state = match retry
            .run("send_text", move || notifier.send_text(channel, text))
            .await
        {
            Ok(()) => DeliveryState::Sent,
            Err(e) => DeliveryState::Failed {
                error: self.delivery_failed(metric, "text", e.to_string()),
            },
        };

        let chart_state = match chart {
            Ok(chart) => {
                let chart = &chart;
                match retry
                    .run("send_image", move || notifier.send_image(channel, chart))
                    .await
                {
                    Ok(()) => DeliveryState::Sent,
                    Err(e) => DeliveryState::Failed {
                        error: self.delivery_failed(metric, "image", e.to_string()),
                    },
                }
            }
            Err(e) => DeliveryState::NotRendered {
                error: self.delivery_failed(metric, "render", e.to_string()),
            },
        };

        DeliveryOutcome {
            text: text_state,
            chart: chart_state,
        }
    }

    /// Count and log a failed delivery step, handing the error back
    fn delivery_failed(&self, metric: MetricId, stage: &str, error: String) -> String {
        self.metrics.inc_delivery_errors(stage);
        self.logger.log_delivery_failure(metric, stage, &error);
        error
    }
}
