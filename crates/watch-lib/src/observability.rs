//! Observability infrastructure for the metric watcher
//!
//! Provides:
//! - Prometheus metrics (run latency, evaluations, anomalies, failures)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::AnomalyEvent;
use crate::models::MetricId;
use crate::pipeline::RunReport;

/// Histogram buckets for run latency (in seconds)
const RUN_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct WatchMetricsInner {
    run_latency_seconds: Histogram,
    metrics_evaluated: IntCounterVec,
    anomalies_detected: IntCounterVec,
    fetch_errors: IntCounterVec,
    delivery_errors: IntCounterVec,
    last_run_timestamp: IntGauge,
}

impl WatchMetricsInner {
    fn new() -> Self {
        Self {
            run_latency_seconds: register_histogram!(
                "metric_watch_run_latency_seconds",
                "Time spent on one evaluation run",
                RUN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            metrics_evaluated: register_int_counter_vec!(
                "metric_watch_metrics_evaluated_total",
                "Metric evaluations by outcome",
                &["metric", "outcome"]
            )
            .expect("Failed to register metrics_evaluated"),

            anomalies_detected: register_int_counter_vec!(
                "metric_watch_anomalies_detected_total",
                "Anomalies detected per metric",
                &["metric"]
            )
            .expect("Failed to register anomalies_detected"),

            fetch_errors: register_int_counter_vec!(
                "metric_watch_fetch_errors_total",
                "Series fetch failures per metric",
                &["metric"]
            )
            .expect("Failed to register fetch_errors"),

            delivery_errors: register_int_counter_vec!(
                "metric_watch_delivery_errors_total",
                "Render or notification failures per stage",
                &["stage"]
            )
            .expect("Failed to register delivery_errors"),

            last_run_timestamp: register_int_gauge!(
                "metric_watch_last_run_timestamp_seconds",
                "Unix time the last run finished"
            )
            .expect("Failed to register last_run_timestamp"),
        }
    }
}

/// Watcher metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct WatchMetrics {
    _private: (),
}

impl Default for WatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchMetricsInner::new)
    }

    pub fn observe_run_latency(&self, duration_secs: f64) {
        self.inner().run_latency_seconds.observe(duration_secs);
    }

    /// Count one evaluation outcome (`normal`, `anomalous`, `no_verdict`, `failed`, `timed_out`)
    pub fn inc_evaluated(&self, metric: MetricId, outcome: &str) {
        self.inner()
            .metrics_evaluated
            .with_label_values(&[metric.as_str(), outcome])
            .inc();
    }

    pub fn inc_anomalies_detected(&self, metric: MetricId) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[metric.as_str()])
            .inc();
    }

    pub fn inc_fetch_errors(&self, metric: MetricId) {
        self.inner()
            .fetch_errors
            .with_label_values(&[metric.as_str()])
            .inc();
    }

    /// Count a delivery failure (`render`, `text`, `image`)
    pub fn inc_delivery_errors(&self, stage: &str) {
        self.inner()
            .delivery_errors
            .with_label_values(&[stage])
            .inc();
    }

    pub fn set_last_run_timestamp(&self, timestamp: i64) {
        self.inner().last_run_timestamp.set(timestamp);
    }
}

/// Structured logger for watcher events
///
/// Provides consistent JSON-formatted logging for runs, anomalies,
/// and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log the start of an evaluation run
    pub fn log_run_started(&self, metrics: &[MetricId]) {
        let names: Vec<&str> = metrics.iter().map(MetricId::as_str).collect();
        info!(
            event = "run_started",
            instance = %self.instance,
            metrics = ?names,
            "Evaluation run started"
        );
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, event: &AnomalyEvent) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            metric = %event.metric,
            bucket = %event.bucket,
            observed = event.observed_value,
            lower = event.lower_bound,
            upper = event.upper_bound,
            deviation = %event.deviation_pct,
            breach = %event.breach,
            "Anomaly detected"
        );
    }

    /// Log a metric skipped for this run
    pub fn log_metric_skipped(&self, metric: MetricId, stage: &str, reason: &str) {
        warn!(
            event = "metric_skipped",
            instance = %self.instance,
            metric = %metric,
            stage = %stage,
            reason = %reason,
            "Metric skipped this run"
        );
    }

    /// Log a failed alert delivery
    pub fn log_delivery_failure(&self, metric: MetricId, stage: &str, error: &str) {
        warn!(
            event = "delivery_failed",
            instance = %self.instance,
            metric = %metric,
            stage = %stage,
            error = %error,
            "Alert delivery failed"
        );
    }

    /// Log the run summary
    pub fn log_run_completed(&self, report: &RunReport) {
        let summary = report.summary();
        info!(
            event = "run_completed",
            instance = %self.instance,
            normal = summary.normal,
            anomalous = summary.anomalous,
            no_verdict = summary.no_verdict,
            failed = summary.failed,
            timed_out = summary.timed_out,
            elapsed_ms = report.elapsed_ms(),
            "Evaluation run completed"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, metrics: &[MetricId]) {
        let names: Vec<&str> = metrics.iter().map(MetricId::as_str).collect();
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            metrics = ?names,
            "Metric watcher started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Metric watcher shutting down"
        );
    }
}
