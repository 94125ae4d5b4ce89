//! Core data models for metric evaluation

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SeriesError;

/// Default bucket width (15 minutes)
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(15 * 60);

/// Default lookback (one day, 96 buckets at the default width)
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Metrics that can be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    /// Distinct users active in the feed
    ActiveUsers,
    Views,
    Likes,
    /// Likes per view
    Ctr,
    /// Distinct users sending messages
    MessengerUsers,
    MessagesSent,
}

impl MetricId {
    /// Every known metric
    pub const ALL: [MetricId; 6] = [
        MetricId::ActiveUsers,
        MetricId::Views,
        MetricId::Likes,
        MetricId::Ctr,
        MetricId::MessengerUsers,
        MetricId::MessagesSent,
    ];

    /// Metrics evaluated when none are configured
    pub const DEFAULT_SET: [MetricId; 3] = [MetricId::ActiveUsers, MetricId::Views, MetricId::Likes];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricId::ActiveUsers => "active_users",
            MetricId::Views => "views",
            MetricId::Likes => "likes",
            MetricId::Ctr => "ctr",
            MetricId::MessengerUsers => "messenger_users",
            MetricId::MessagesSent => "messages_sent",
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricId {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricId::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// Start of the bucket containing `ts`
pub fn bucket_start(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = width.as_secs().max(1) as i64;
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(width_secs);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Range of closed buckets covering `lookback` before the bucket containing `now`.
    ///
    /// The in-progress bucket is excluded.
    pub fn trailing(now: DateTime<Utc>, lookback: Duration, bucket_width: Duration) -> Self {
        let end = bucket_start(now, bucket_width);
        let lookback =
            chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            start: bucket_start(end - lookback, bucket_width),
            end,
        }
    }

    /// Number of whole buckets in the range
    pub fn bucket_count(&self, bucket_width: Duration) -> usize {
        let width = bucket_width.as_secs().max(1) as i64;
        ((self.end.timestamp() - self.start.timestamp()).max(0) / width) as usize
    }
}

/// A single bucketed observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub bucket: DateTime<Utc>,
    pub value: f64,
}

/// Ordered, contiguous, fixed-width series for one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    metric: MetricId,
    bucket_width_secs: u64,
    points: Vec<DataPoint>,
}

impl TimeSeries {
    /// Build a series, checking ordering, alignment and contiguity
    pub fn new(
        metric: MetricId,
        bucket_width: Duration,
        points: Vec<DataPoint>,
    ) -> Result<Self, SeriesError> {
        let width = bucket_width.as_secs() as i64;
        if width == 0 {
            return Err(SeriesError::ZeroWidth);
        }
        if points.is_empty() {
            return Err(SeriesError::Empty);
        }

        for point in &points {
            if point.bucket.timestamp().rem_euclid(width) != 0 {
                return Err(SeriesError::Misaligned { at: point.bucket });
            }
            if !point.value.is_finite() {
                return Err(SeriesError::NonFinite { at: point.bucket });
            }
        }

        for pair in points.windows(2) {
            let step = pair[1].bucket.timestamp() - pair[0].bucket.timestamp();
            if step <= 0 {
                return Err(SeriesError::Unordered { at: pair[1].bucket });
            }
            if step > width {
                return Err(SeriesError::Gap {
                    after: pair[0].bucket,
                    next: pair[1].bucket,
                });
            }
        }

        Ok(Self {
            metric,
            bucket_width_secs: width as u64,
            points,
        })
    }

    /// Build a contiguous series from consecutive values starting at `start`
    pub fn from_values(
        metric: MetricId,
        start: DateTime<Utc>,
        bucket_width: Duration,
        values: &[f64],
    ) -> Result<Self, SeriesError> {
        let step = chrono::Duration::seconds(bucket_width.as_secs() as i64);
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &value)| DataPoint {
                bucket: start + step * i as i32,
                value,
            })
            .collect();
        Self::new(metric, bucket_width, points)
    }

    pub fn metric(&self) -> MetricId {
        self.metric
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_width_secs)
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The most recent closed bucket
    pub fn latest(&self) -> &DataPoint {
        // construction guarantees at least one point
        &self.points[self.points.len() - 1]
    }

    /// The bucket immediately before the latest one
    pub fn previous(&self) -> Option<&DataPoint> {
        self.points.len().checked_sub(2).map(|i| &self.points[i])
    }
}

/// Expected range for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}
