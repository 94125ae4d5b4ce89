//! Error taxonomy for fetching, validating and delivering metric alerts

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::MetricId;

/// Structural problems with a bucketed series
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series has no points")]
    Empty,
    #[error("bucket width must be at least one second")]
    ZeroWidth,
    #[error("bucket {at} is not aligned to the bucket width")]
    Misaligned { at: DateTime<Utc> },
    #[error("bucket {at} is not after the previous bucket")]
    Unordered { at: DateTime<Utc> },
    #[error("missing buckets between {after} and {next}")]
    Gap {
        after: DateTime<Utc>,
        next: DateTime<Utc>,
    },
    #[error("bucket {at} holds a non-finite value")]
    NonFinite { at: DateTime<Utc> },
}

/// Failures fetching a series from the metric source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    #[error("metric source returned no rows for {0}")]
    EmptySeries(MetricId),

    #[error("invalid series for {metric}: {source}")]
    InvalidSeries {
        metric: MetricId,
        #[source]
        source: SeriesError,
    },

    #[error("no query registered for metric {0}")]
    UnregisteredMetric(MetricId),
}

impl SourceError {
    /// Transport or query failures, as opposed to data problems
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Failures rendering or delivering an alert
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    #[error("notifier failure: {0}")]
    NotifierFailure(String),

    #[error("render failure: {0}")]
    RenderFailure(String),
}
