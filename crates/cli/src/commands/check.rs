//! One-off evaluation pass

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;
use tokio::time::Instant;
use watch_lib::{
    anomaly::compose_alert,
    notify::{LogNotifier, Notifier, PngChartRenderer, TelegramConfig, TelegramNotifier},
    pipeline::{DeliveryState, DispatchMode, MetricStatus, Pipeline, PipelineConfig},
    source::{ClickHouseSource, SeriesFetcher},
    MetricId, RetryPolicy, RunReport, DEFAULT_BUCKET_WIDTH,
};

use crate::output::{
    color_status, format_range, format_value, print_info, print_json, print_table, OutputFormat,
};
use crate::{DetectionArgs, StoreArgs};

/// Row for the run report table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Deviation")]
    deviation: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn delivery_label(state: &DeliveryState) -> &str {
    match state {
        DeliveryState::Sent => "sent",
        DeliveryState::Skipped => "skipped",
        DeliveryState::Failed { error } | DeliveryState::NotRendered { error } => error.as_str(),
    }
}

fn outcome_row(metric: MetricId, status: &MetricStatus) -> OutcomeRow {
    let mut row = OutcomeRow {
        metric: metric.to_string(),
        status: color_status(status.label()),
        value: "-".to_string(),
        expected: "-".to_string(),
        deviation: "-".to_string(),
        detail: String::new(),
    };

    match status {
        MetricStatus::Normal {
            observed,
            lower,
            upper,
        } => {
            row.value = format_value(*observed);
            row.expected = format_range(*lower, *upper);
        }
        MetricStatus::NoVerdict { points } => {
            row.detail = format!("only {} buckets of history", points);
        }
        MetricStatus::Anomalous { event, delivery } => {
            row.value = format_value(event.observed_value);
            row.expected = format_range(event.lower_bound, event.upper_bound);
            row.deviation = event.deviation_pct.to_string();
            row.detail = format!(
                "{} at {}; text {}, chart {}",
                event.breach,
                event.bucket.format("%H:%M"),
                delivery_label(&delivery.text),
                delivery_label(&delivery.chart)
            );
        }
        MetricStatus::Failed { error, .. } => {
            row.detail = error.clone();
        }
        MetricStatus::TimedOut => {
            row.detail = "deadline exceeded".to_string();
        }
    }
    row
}

/// Print a run report as a table with a summary line
pub fn print_report(report: &RunReport) {
    let rows: Vec<OutcomeRow> = report
        .outcomes
        .iter()
        .map(|o| outcome_row(o.metric, &o.status))
        .collect();
    print_table(rows);

    let summary = report.summary();
    println!(
        "\n{} normal, {} anomalous, {} without verdict, {} failed, {} timed out",
        summary.normal,
        summary.anomalous.to_string().red(),
        summary.no_verdict,
        summary.failed,
        summary.timed_out
    );
}

/// Run the pipeline once against ClickHouse
pub async fn run_check(
    metrics: Vec<MetricId>,
    store: &StoreArgs,
    detection: &DetectionArgs,
    telegram: Option<TelegramConfig>,
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let metrics = if metrics.is_empty() {
        MetricId::DEFAULT_SET.to_vec()
    } else {
        metrics
    };

    let source = ClickHouseSource::new(&store.to_config())?;
    let fetcher = SeriesFetcher::new(Arc::new(source), DEFAULT_BUCKET_WIDTH);

    let (notifier, channel, mode) = match telegram {
        Some(config) => {
            let notifier = TelegramNotifier::new(&config).context("Failed to create Telegram notifier")?;
            (
                Arc::new(notifier) as Arc<dyn Notifier>,
                config.chat_id,
                DispatchMode::Notify,
            )
        }
        None => (
            Arc::new(LogNotifier) as Arc<dyn Notifier>,
            String::new(),
            DispatchMode::DryRun,
        ),
    };

    let pipeline = Pipeline::new(
        fetcher,
        detection.classifier(),
        Arc::new(PngChartRenderer::default()),
        notifier,
        PipelineConfig {
            metrics,
            lookback: detection.lookback(),
            channel,
            delivery_retry: RetryPolicy::default(),
            mode,
        },
    );

    let report = pipeline.run(Instant::now() + timeout).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_report(&report);
            if mode == DispatchMode::DryRun {
                for event in report.anomalies() {
                    println!();
                    println!("{}", compose_alert(event.metric, event));
                }
                if report.summary().anomalous > 0 {
                    println!();
                    print_info("Dry run: pass --notify to deliver these alerts");
                }
            }
        }
    }
    Ok(())
}
