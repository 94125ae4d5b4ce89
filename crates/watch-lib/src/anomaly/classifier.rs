//! Classification of the latest bucket against its estimated bounds

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BoundEstimator;
use crate::models::{Bounds, MetricId, TimeSeries};

/// Relative change of the observed value versus the previous bucket.
///
/// `Undefined` when the previous value is zero (or the ratio is not finite).
/// Serialized as a number, or `null` when undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Deviation {
    Ratio(f64),
    Undefined,
}

impl Deviation {
    /// `|1 - observed / previous|`
    pub fn between(observed: f64, previous: f64) -> Self {
        if previous == 0.0 {
            return Deviation::Undefined;
        }
        let ratio = (1.0 - observed / previous).abs();
        if ratio.is_finite() {
            Deviation::Ratio(ratio)
        } else {
            Deviation::Undefined
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        match self {
            Deviation::Ratio(r) => Some(*r),
            Deviation::Undefined => None,
        }
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deviation::Ratio(r) => write!(f, "{:.2}%", r * 100.0),
            Deviation::Undefined => f.write_str("n/a"),
        }
    }
}

impl From<Option<f64>> for Deviation {
    fn from(value: Option<f64>) -> Self {
        value.map(Deviation::Ratio).unwrap_or(Deviation::Undefined)
    }
}

impl From<Deviation> for Option<f64> {
    fn from(value: Deviation) -> Self {
        value.ratio()
    }
}

/// Which side of the expected range was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breach {
    Above,
    Below,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::Above => write!(f, "above"),
            Breach::Below => write!(f, "below"),
        }
    }
}

/// Anomalous latest bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub metric: MetricId,
    pub bucket: DateTime<Utc>,
    pub observed_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub deviation_pct: Deviation,
    pub breach: Breach,
}

/// Outcome of classifying one bucket
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Observed value is inside the expected range
    Normal { observed: f64, bounds: Bounds },
    /// Observed value breached the expected range
    Anomalous(AnomalyEvent),
    /// Not enough history to estimate bounds
    InsufficientHistory,
}

impl Verdict {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Verdict::Anomalous(_))
    }
}

/// Classify a single observation.
///
/// Undefined bounds never produce an anomaly.
pub fn classify_point(
    metric: MetricId,
    bucket: DateTime<Utc>,
    observed: f64,
    bounds: Option<Bounds>,
    previous: Option<f64>,
) -> Verdict {
    let Some(bounds) = bounds else {
        return Verdict::InsufficientHistory;
    };

    let breach = if observed > bounds.upper {
        Breach::Above
    } else if observed < bounds.lower {
        Breach::Below
    } else {
        return Verdict::Normal { observed, bounds };
    };

    Verdict::Anomalous(AnomalyEvent {
        metric,
        bucket,
        observed_value: observed,
        lower_bound: bounds.lower,
        upper_bound: bounds.upper,
        deviation_pct: previous
            .map(|prev| Deviation::between(observed, prev))
            .unwrap_or(Deviation::Undefined),
        breach,
    })
}

/// Classifies the latest bucket of a series
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyClassifier {
    estimator: BoundEstimator,
}

impl AnomalyClassifier {
    pub fn new(estimator: BoundEstimator) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &BoundEstimator {
        &self.estimator
    }

    /// Evaluate exactly the latest bucket of `series`
    pub fn classify(&self, series: &TimeSeries) -> Verdict {
        let latest = series.latest();
        classify_point(
            series.metric(),
            latest.bucket,
            latest.value,
            self.estimator.estimate(series),
            series.previous().map(|p| p.value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_BUCKET_WIDTH;
    use chrono::TimeZone;

    fn series(values: &[f64]) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 23, 8, 0, 0).unwrap();
        TimeSeries::from_values(MetricId::Views, start, DEFAULT_BUCKET_WIDTH, values).unwrap()
    }

    #[test]
    fn test_spike_over_flat_baseline() {
        let classifier = AnomalyClassifier::default();
        let verdict = classifier.classify(&series(&[10.0, 10.0, 10.0, 10.0, 10.0, 100.0]));

        let Verdict::Anomalous(event) = verdict else {
            panic!("expected anomaly, got {verdict:?}");
        };
        assert_eq!(event.lower_bound, 10.0);
        assert_eq!(event.upper_bound, 10.0);
        assert_eq!(event.breach, Breach::Above);
        assert_eq!(event.deviation_pct, Deviation::Ratio(9.0));
        assert_eq!(event.bucket, Utc.with_ymd_and_hms(2024, 3, 23, 9, 15, 0).unwrap());
    }

    #[test]
    fn test_flat_baseline_any_change_is_anomalous() {
        let classifier = AnomalyClassifier::default();

        let same = classifier.classify(&series(&[4.0, 4.0, 4.0, 4.0, 4.0, 4.0]));
        assert!(matches!(same, Verdict::Normal { .. }));

        let dip = classifier.classify(&series(&[4.0, 4.0, 4.0, 4.0, 4.0, 3.99]));
        let Verdict::Anomalous(event) = dip else {
            panic!("expected anomaly");
        };
        assert_eq!(event.breach, Breach::Below);
    }

    #[test]
    fn test_value_inside_dispersed_range() {
        let classifier = AnomalyClassifier::default();
        let verdict = classifier.classify(&series(&[10.0, 12.0, 11.0, 13.0, 12.0, 14.0]));
        assert_eq!(
            verdict,
            Verdict::Normal {
                observed: 14.0,
                bounds: Bounds { lower: 8.0, upper: 15.0 }
            }
        );
    }

    #[test]
    fn test_insufficient_history_never_alerts() {
        let classifier = AnomalyClassifier::default();
        assert_eq!(
            classifier.classify(&series(&[1.0, 500.0, 0.0])),
            Verdict::InsufficientHistory
        );
        assert_eq!(
            classifier.classify(&series(&[1.0, 1.0, 1.0, 1.0, 1_000_000.0])),
            Verdict::InsufficientHistory
        );
    }

    #[test]
    fn test_zero_previous_uses_sentinel() {
        let classifier = AnomalyClassifier::default();
        let verdict = classifier.classify(&series(&[0.0, 0.0, 0.0, 0.0, 0.0, 25.0]));

        let Verdict::Anomalous(event) = verdict else {
            panic!("expected anomaly");
        };
        assert_eq!(event.deviation_pct, Deviation::Undefined);
        assert_eq!(event.deviation_pct.to_string(), "n/a");
    }

    #[test]
    fn test_deviation_formatting_and_serde() {
        assert_eq!(Deviation::between(100.0, 10.0).to_string(), "900.00%");
        assert_eq!(Deviation::between(5.0, 10.0), Deviation::Ratio(0.5));
        assert_eq!(Deviation::between(5.0, 0.0), Deviation::Undefined);

        assert_eq!(serde_json::to_string(&Deviation::Undefined).unwrap(), "null");
        let parsed: Deviation = serde_json::from_str("0.25").unwrap();
        assert_eq!(parsed, Deviation::Ratio(0.25));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let classifier = AnomalyClassifier::default();
        let s = series(&[20.0, 22.0, 19.0, 21.0, 23.0, 20.0, 80.0]);
        assert_eq!(classifier.classify(&s), classifier.classify(&s));
    }
}
