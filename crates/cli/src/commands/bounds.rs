//! Expected-range inspection for one metric

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use watch_lib::{
    anomaly::Verdict,
    source::{ClickHouseSource, SeriesFetcher},
    Bounds, MetricId, TimeSeries, DEFAULT_BUCKET_WIDTH,
};

use crate::output::{format_value, print_json, print_table, print_warning, OutputFormat};
use crate::{DetectionArgs, StoreArgs};

/// One bucket with its expected range
#[derive(Debug, Serialize)]
struct BandPoint {
    bucket: DateTime<Utc>,
    value: f64,
    lower: Option<f64>,
    upper: Option<f64>,
}

#[derive(Tabled)]
struct BandRow {
    #[tabled(rename = "Bucket (UTC)")]
    bucket: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Lower")]
    lower: String,
    #[tabled(rename = "Upper")]
    upper: String,
    #[tabled(rename = "")]
    flag: String,
}

/// Last `tail` buckets of the series paired with the band
fn band_tail(series: &TimeSeries, band: &[Option<Bounds>], tail: usize) -> Vec<BandPoint> {
    let skip = series.len().saturating_sub(tail);
    series
        .points()
        .iter()
        .zip(band)
        .skip(skip)
        .map(|(point, bounds)| BandPoint {
            bucket: point.bucket,
            value: point.value,
            lower: bounds.map(|b| b.lower),
            upper: bounds.map(|b| b.upper),
        })
        .collect()
}

fn band_row(point: &BandPoint) -> BandRow {
    let flag = match (point.lower, point.upper) {
        (Some(lower), _) if point.value < lower => "below".red().to_string(),
        (_, Some(upper)) if point.value > upper => "above".red().to_string(),
        _ => String::new(),
    };
    BandRow {
        bucket: point.bucket.format("%m-%d %H:%M").to_string(),
        value: format_value(point.value),
        lower: point.lower.map(format_value).unwrap_or_else(|| "n/a".to_string()),
        upper: point.upper.map(format_value).unwrap_or_else(|| "n/a".to_string()),
        flag,
    }
}

/// Fetch a metric and print its recent values against the band
pub async fn show_bounds(
    metric: MetricId,
    tail: usize,
    store: &StoreArgs,
    detection: &DetectionArgs,
    format: OutputFormat,
) -> Result<()> {
    let source = ClickHouseSource::new(&store.to_config())?;
    let fetcher = SeriesFetcher::new(Arc::new(source), DEFAULT_BUCKET_WIDTH);
    let series = fetcher.fetch(metric, detection.lookback()).await?;

    let classifier = detection.classifier();
    let band = classifier.estimator().band(&series);
    let points = band_tail(&series, &band, tail);

    match format {
        OutputFormat::Json => print_json(&points)?,
        OutputFormat::Table => {
            println!(
                "{} {} ({} buckets fetched)",
                "Metric:".bold(),
                metric.to_string().cyan(),
                series.len()
            );
            print_table(points.iter().map(band_row).collect());

            // band values before the latest bucket are centered and may look ahead
            match classifier.classify(&series) {
                Verdict::Anomalous(event) => println!(
                    "\nLatest bucket is {} the expected range (deviation {})",
                    event.breach.to_string().red().bold(),
                    event.deviation_pct
                ),
                Verdict::Normal { .. } => {
                    println!("\nLatest bucket is {}", "within the expected range".green())
                }
                Verdict::InsufficientHistory => {
                    print_warning("Not enough history to estimate the latest bucket")
                }
            }
        }
    }
    Ok(())
}
