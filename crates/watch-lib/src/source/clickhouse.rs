//! ClickHouse metric source over the HTTP interface

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{MetricSource, QueryCatalog};
use crate::error::SourceError;
use crate::models::{DataPoint, MetricId, TimeRange, TimeSeries};

/// Connection settings for the ClickHouse HTTP interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// HTTP endpoint (e.g., "https://clickhouse.example.com:8443")
    #[serde(default = "default_url")]
    pub url: String,
    /// Database holding the action tables
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            user: default_user(),
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// One `JSONEachRow` result row
#[derive(Debug, Deserialize)]
struct Row {
    ts: i64,
    value: f64,
}

/// Metric source backed by ClickHouse
pub struct ClickHouseSource {
    client: Client,
    url: Url,
    user: String,
    password: Option<String>,
    catalog: QueryCatalog,
}

impl ClickHouseSource {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let catalog = QueryCatalog::new(&config.database);
        Self::with_catalog(config, catalog)
    }

    /// Create a source with a custom query catalog
    pub fn with_catalog(config: &ClickHouseConfig, catalog: QueryCatalog) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        let url = Url::parse(&config.url)
            .with_context(|| format!("Invalid ClickHouse URL: {}", config.url))?;

        Ok(Self {
            client,
            url,
            user: config.user.clone(),
            password: config.password.clone(),
            catalog,
        })
    }

    async fn query_one(
        &self,
        metric: MetricId,
        range: &TimeRange,
        bucket_width: Duration,
    ) -> Result<TimeSeries, SourceError> {
        let statement = self
            .catalog
            .statement(metric)
            .ok_or(SourceError::UnregisteredMetric(metric))?;

        let mut request = self
            .client
            .post(self.url.clone())
            .query(&[
                ("param_start", range.start.timestamp().to_string()),
                ("param_end", range.end.timestamp().to_string()),
                ("param_width", bucket_width.as_secs().to_string()),
                ("output_format_json_quote_64bit_integers", "0".to_string()),
            ])
            .header("X-ClickHouse-User", &self.user)
            .body(statement.to_string());
        if let Some(ref password) = self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(metric = %metric, status = %status, "ClickHouse query failed");
            return Err(SourceError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(e.without_url().to_string()))?;

        let points = parse_rows(&body)?;
        debug!(metric = %metric, rows = points.len(), "ClickHouse query returned");

        if points.is_empty() {
            return Err(SourceError::EmptySeries(metric));
        }

        TimeSeries::new(metric, bucket_width, points)
            .map_err(|source| SourceError::InvalidSeries { metric, source })
    }
}

/// Parse newline-delimited JSON rows into points
fn parse_rows(body: &str) -> Result<Vec<DataPoint>, SourceError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: Row = serde_json::from_str(line)
                .map_err(|e| SourceError::Unavailable(format!("malformed row: {}", e)))?;
            let bucket = DateTime::from_timestamp(row.ts, 0)
                .ok_or_else(|| SourceError::Unavailable(format!("bad timestamp {}", row.ts)))?;
            Ok(DataPoint {
                bucket,
                value: row.value,
            })
        })
        .collect()
}

#[async_trait]
impl MetricSource for ClickHouseSource {
    async fn query(
        &self,
        metrics: &[MetricId],
        range: &TimeRange,
        bucket_width: Duration,
    ) -> Result<HashMap<MetricId, TimeSeries>, SourceError> {
        let mut out = HashMap::with_capacity(metrics.len());
        for &metric in metrics {
            let series = self.query_one(metric, range, bucket_width).await?;
            out.insert(metric, series);
        }
        Ok(out)
    }
}
