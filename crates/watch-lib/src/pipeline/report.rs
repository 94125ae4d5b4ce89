//! Run summary returned by the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyEvent;
use crate::models::MetricId;

/// Stage at which a metric's evaluation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    /// The evaluation task itself aborted
    Task,
}

/// State of one delivery step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    Skipped,
    /// The notifier rejected the message after retries
    Failed { error: String },
    /// No chart was produced, so nothing was sent
    NotRendered { error: String },
}

impl DeliveryState {
    /// Nothing reached the channel for this step
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            DeliveryState::Failed { .. } | DeliveryState::NotRendered { .. }
        )
    }
}

/// What happened to an alert's text and chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub text: DeliveryState,
    pub chart: DeliveryState,
}

impl DeliveryOutcome {
    pub fn skipped() -> Self {
        Self {
            text: DeliveryState::Skipped,
            chart: DeliveryState::Skipped,
        }
    }
}

/// Result of evaluating one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricStatus {
    Normal {
        observed: f64,
        lower: f64,
        upper: f64,
    },
    /// Too little history for bounds
    NoVerdict { points: usize },
    Anomalous {
        event: AnomalyEvent,
        delivery: DeliveryOutcome,
    },
    Failed {
        stage: FailureStage,
        error: String,
        /// The metric store could not be reached
        #[serde(default)]
        unavailable: bool,
    },
    /// Not evaluated before the run deadline
    TimedOut,
}

impl MetricStatus {
    /// Label used for metrics and table output
    pub fn label(&self) -> &'static str {
        match self {
            MetricStatus::Normal { .. } => "normal",
            MetricStatus::NoVerdict { .. } => "no_verdict",
            MetricStatus::Anomalous { .. } => "anomalous",
            MetricStatus::Failed { .. } => "failed",
            MetricStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOutcome {
    pub metric: MetricId,
    #[serde(flatten)]
    pub status: MetricStatus,
}

/// Outcome counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub normal: usize,
    pub anomalous: usize,
    pub no_verdict: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Outcome of one pipeline run, in configured metric order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<MetricOutcome>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for outcome in &self.outcomes {
            match outcome.status {
                MetricStatus::Normal { .. } => summary.normal += 1,
                MetricStatus::NoVerdict { .. } => summary.no_verdict += 1,
                MetricStatus::Anomalous { .. } => summary.anomalous += 1,
                MetricStatus::Failed { .. } => summary.failed += 1,
                MetricStatus::TimedOut => summary.timed_out += 1,
            }
        }
        summary
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            MetricStatus::Anomalous { event, .. } => Some(event),
            _ => None,
        })
    }

    pub fn status(&self, metric: MetricId) -> Option<&MetricStatus> {
        self.outcomes
            .iter()
            .find(|o| o.metric == metric)
            .map(|o| &o.status)
    }

    /// True when every metric failed because the store was unreachable
    pub fn all_sources_unavailable(&self) -> bool {
        !self.outcomes.is_empty()
            && self.outcomes.iter().all(|o| {
                matches!(
                    o.status,
                    MetricStatus::Failed {
                        unavailable: true,
                        ..
                    }
                )
            })
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{Breach, Deviation};
    use chrono::TimeZone;

    fn report(outcomes: Vec<MetricOutcome>) -> RunReport {
        let at = Utc.with_ymd_and_hms(2024, 3, 23, 11, 0, 0).unwrap();
        RunReport {
            started_at: at,
            finished_at: at + chrono::Duration::milliseconds(250),
            outcomes,
        }
    }

    fn unavailable(metric: MetricId) -> MetricOutcome {
        MetricOutcome {
            metric,
            status: MetricStatus::Failed {
                stage: FailureStage::Fetch,
                error: "connection refused".to_string(),
                unavailable: true,
            },
        }
    }

    #[test]
    fn test_summary_counts() {
        let r = report(vec![
            unavailable(MetricId::Views),
            MetricOutcome {
                metric: MetricId::Likes,
                status: MetricStatus::NoVerdict { points: 3 },
            },
            MetricOutcome {
                metric: MetricId::ActiveUsers,
                status: MetricStatus::TimedOut,
            },
        ]);

        let summary = r.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.no_verdict, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(r.elapsed_ms(), 250);
        assert!(!r.all_sources_unavailable());
    }

    #[test]
    fn test_all_sources_unavailable() {
        assert!(report(vec![unavailable(MetricId::Views), unavailable(MetricId::Likes)])
            .all_sources_unavailable());
        assert!(!report(vec![]).all_sources_unavailable());
    }

    #[test]
    fn test_report_json_shape() {
        let event = AnomalyEvent {
            metric: MetricId::Views,
            bucket: Utc.with_ymd_and_hms(2024, 3, 23, 10, 45, 0).unwrap(),
            observed_value: 100.0,
            lower_bound: 10.0,
            upper_bound: 10.0,
            deviation_pct: Deviation::Ratio(9.0),
            breach: Breach::Above,
        };
        let r = report(vec![MetricOutcome {
            metric: MetricId::Views,
            status: MetricStatus::Anomalous {
                event,
                delivery: DeliveryOutcome {
                    text: DeliveryState::Sent,
                    chart: DeliveryState::NotRendered {
                        error: "canvas 50x50 is too small".to_string(),
                    },
                },
            },
        }]);

        let json = serde_json::to_value(&r).unwrap();
        let outcome = &json["outcomes"][0];
        assert_eq!(outcome["metric"], "views");
        assert_eq!(outcome["status"], "anomalous");
        assert_eq!(outcome["delivery"]["text"]["state"], "sent");
        assert_eq!(outcome["delivery"]["chart"]["state"], "not_rendered");

        let back: RunReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.anomalies().count(), 1);
    }
}
