//! Time series retrieval from the metric store
//!
//! A [`MetricSource`] answers bucketed range queries for a set of metrics.
//! [`SeriesFetcher`] narrows that to one metric over a trailing lookback
//! that ends at the last closed bucket.

mod catalog;
mod clickhouse;

pub use catalog::{MetricQuery, QueryCatalog};
pub use clickhouse::{ClickHouseConfig, ClickHouseSource};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::{MetricId, TimeRange, TimeSeries};

/// Trait for metric store implementations
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch bucketed series for each requested metric over `range`
    async fn query(
        &self,
        metrics: &[MetricId],
        range: &TimeRange,
        bucket_width: Duration,
    ) -> Result<HashMap<MetricId, TimeSeries>, SourceError>;
}

/// Fetches one metric's trailing series
#[derive(Clone)]
pub struct SeriesFetcher {
    source: Arc<dyn MetricSource>,
    bucket_width: Duration,
}

impl SeriesFetcher {
    pub fn new(source: Arc<dyn MetricSource>, bucket_width: Duration) -> Self {
        Self {
            source,
            bucket_width,
        }
    }

    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    /// Fetch the series covering `lookback` before the current bucket
    pub async fn fetch(&self, metric: MetricId, lookback: Duration) -> Result<TimeSeries, SourceError> {
        self.fetch_at(metric, lookback, Utc::now()).await
    }

    /// Fetch as if the current time were `now`
    pub async fn fetch_at(
        &self,
        metric: MetricId,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Result<TimeSeries, SourceError> {
        let range = TimeRange::trailing(now, lookback, self.bucket_width);
        let mut series = self
            .source
            .query(&[metric], &range, self.bucket_width)
            .await?;

        let series = series
            .remove(&metric)
            .ok_or(SourceError::EmptySeries(metric))?;

        tracing::debug!(
            metric = %metric,
            buckets = series.len(),
            start = %range.start,
            end = %range.end,
            "Fetched series"
        );

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataPoint, DEFAULT_BUCKET_WIDTH, DEFAULT_LOOKBACK};
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Records requested ranges and answers with a flat series
    struct RecordingSource {
        ranges: Mutex<Vec<TimeRange>>,
        empty: bool,
    }

    #[async_trait]
    impl MetricSource for RecordingSource {
        async fn query(
            &self,
            metrics: &[MetricId],
            range: &TimeRange,
            bucket_width: Duration,
        ) -> Result<HashMap<MetricId, TimeSeries>, SourceError> {
            self.ranges.lock().unwrap().push(*range);
            if self.empty {
                return Ok(HashMap::new());
            }

            let step = chrono::Duration::seconds(bucket_width.as_secs() as i64);
            let mut out = HashMap::new();
            for &metric in metrics {
                let points = (0..range.bucket_count(bucket_width))
                    .map(|i| DataPoint {
                        bucket: range.start + step * i as i32,
                        value: 1.0,
                    })
                    .collect();
                out.insert(metric, TimeSeries::new(metric, bucket_width, points).unwrap());
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_fetch_covers_closed_buckets_only() {
        let source = Arc::new(RecordingSource {
            ranges: Mutex::new(Vec::new()),
            empty: false,
        });
        let fetcher = SeriesFetcher::new(source.clone(), DEFAULT_BUCKET_WIDTH);
        let now = Utc.with_ymd_and_hms(2024, 3, 23, 11, 7, 30).unwrap();

        let series = fetcher
            .fetch_at(MetricId::Views, DEFAULT_LOOKBACK, now)
            .await
            .unwrap();

        assert_eq!(series.len(), 96);
        assert_eq!(
            series.latest().bucket,
            Utc.with_ymd_and_hms(2024, 3, 23, 10, 45, 0).unwrap()
        );
        let ranges = source.ranges.lock().unwrap();
        assert_eq!(ranges[0].end, Utc.with_ymd_and_hms(2024, 3, 23, 11, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_fetch_without_rows_is_empty_series() {
        let source = Arc::new(RecordingSource {
            ranges: Mutex::new(Vec::new()),
            empty: true,
        });
        let fetcher = SeriesFetcher::new(source, DEFAULT_BUCKET_WIDTH);

        let err = fetcher
            .fetch(MetricId::Likes, DEFAULT_LOOKBACK)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::EmptySeries(MetricId::Likes)));
    }
}
