//! Alert message composition

use super::AnomalyEvent;
use crate::models::MetricId;

/// Render an anomaly as a human-readable alert message.
///
/// Pure: the same event always yields the same text.
pub fn compose_alert(metric: MetricId, event: &AnomalyEvent) -> String {
    format!(
        "Metric {metric}:\n\
         current value {current:.2}\n\
         deviation from previous value {deviation}\n\
         expected range [{lower:.2}, {upper:.2}], {breach} at {bucket} UTC",
        metric = metric,
        current = event.observed_value,
        deviation = event.deviation_pct,
        lower = event.lower_bound,
        upper = event.upper_bound,
        breach = event.breach,
        bucket = event.bucket.format("%H:%M"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{Breach, Deviation};
    use chrono::{TimeZone, Utc};

    fn event(observed: f64, deviation: Deviation) -> AnomalyEvent {
        AnomalyEvent {
            metric: MetricId::Likes,
            bucket: Utc.with_ymd_and_hms(2024, 3, 23, 11, 45, 0).unwrap(),
            observed_value: observed,
            lower_bound: 10.0,
            upper_bound: 10.0,
            deviation_pct: deviation,
            breach: Breach::Above,
        }
    }

    #[test]
    fn test_message_contains_metric_value_and_deviation() {
        let text = compose_alert(MetricId::Likes, &event(100.0, Deviation::Ratio(9.0)));

        assert!(text.starts_with("Metric likes:"));
        assert!(text.contains("current value 100.00"));
        assert!(text.contains("deviation from previous value 900.00%"));
        assert!(text.contains("expected range [10.00, 10.00], above at 11:45 UTC"));
    }

    #[test]
    fn test_message_rounds_to_two_decimals() {
        let text = compose_alert(MetricId::Ctr, &event(0.123456, Deviation::Ratio(0.0412)));
        assert!(text.contains("current value 0.12"));
        assert!(text.contains("4.12%"));
    }

    #[test]
    fn test_message_uses_sentinel_for_undefined_deviation() {
        let text = compose_alert(MetricId::Views, &event(3.0, Deviation::Undefined));
        assert!(text.contains("deviation from previous value n/a"));
    }
}
