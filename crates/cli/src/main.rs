//! Metric Watch CLI
//!
//! A command-line tool for checking the watcher agent, running an
//! evaluation pass by hand and inspecting a metric's expected range.

mod client;
mod commands;
mod config;
mod output;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use commands::{bounds, check, status};
use watch_lib::{
    anomaly::{AnomalyClassifier, BoundEstimator, DEFAULT_IQR_MULTIPLIER, DEFAULT_TRAILING_WINDOW},
    notify::TelegramConfig,
    source::ClickHouseConfig,
    MetricId,
};

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Metric Watch CLI
#[derive(Parser)]
#[command(name = "mwctl")]
#[command(author, version, about = "CLI for Metric Watch", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via MW_API_URL env var)
    #[arg(long, env = "MW_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show agent health and the last run
    Status,

    /// Run one evaluation pass against ClickHouse
    Check {
        /// Metric to evaluate (repeatable; defaults to active_users, views, likes)
        #[arg(long = "metric", short = 'm')]
        metrics: Vec<MetricId>,

        /// Send alerts to Telegram instead of only printing them
        #[arg(long)]
        notify: bool,

        /// Seconds allowed for fetching and classifying
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        detection: DetectionArgs,

        #[command(flatten)]
        telegram: TelegramArgs,
    },

    /// Show a metric's recent values with their expected range
    Bounds {
        /// Metric name
        metric: MetricId,

        /// Number of most recent buckets to show
        #[arg(long, default_value_t = 12)]
        tail: usize,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        detection: DetectionArgs,
    },

    /// Show or update saved CLI settings
    Config {
        /// Save this agent API URL
        #[arg(long)]
        set_api_url: Option<String>,

        /// Save this output format as the default
        #[arg(long)]
        set_format: Option<output::OutputFormat>,
    },
}

/// ClickHouse connection
#[derive(Args)]
pub struct StoreArgs {
    /// ClickHouse HTTP endpoint
    #[arg(long, env = "WATCH_CLICKHOUSE__URL", default_value = "http://localhost:8123")]
    pub clickhouse_url: String,

    /// Database holding the action tables
    #[arg(long, env = "WATCH_CLICKHOUSE__DATABASE", default_value = "default")]
    pub database: String,

    #[arg(long, env = "WATCH_CLICKHOUSE__USER", default_value = "default")]
    pub user: String,

    #[arg(long, env = "WATCH_CLICKHOUSE__PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl StoreArgs {
    pub fn to_config(&self) -> ClickHouseConfig {
        ClickHouseConfig {
            url: self.clickhouse_url.clone(),
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            ..ClickHouseConfig::default()
        }
    }
}

/// Estimator settings
#[derive(Args)]
pub struct DetectionArgs {
    /// Preceding buckets per estimate (n)
    #[arg(long, default_value_t = DEFAULT_TRAILING_WINDOW, value_parser = parse_window)]
    pub window: usize,

    /// IQR multiplier (a)
    #[arg(long, default_value_t = DEFAULT_IQR_MULTIPLIER, value_parser = parse_multiplier)]
    pub multiplier: f64,

    /// Hours of history to fetch
    #[arg(long, default_value_t = 24)]
    pub lookback_hours: u64,
}

fn parse_window(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("window must be at least 1".to_string()),
        Ok(window) => Ok(window),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_multiplier(value: &str) -> Result<f64, String> {
    let multiplier: f64 = value.parse().map_err(|e| format!("{}", e))?;
    if multiplier.is_finite() && multiplier >= 0.0 {
        Ok(multiplier)
    } else {
        Err("multiplier must be a non-negative number".to_string())
    }
}

impl DetectionArgs {
    pub fn classifier(&self) -> AnomalyClassifier {
        AnomalyClassifier::new(BoundEstimator::new(self.window, self.multiplier))
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_hours * 3600)
    }
}

/// Telegram delivery, needed with --notify
#[derive(Args)]
pub struct TelegramArgs {
    #[arg(long, env = "WATCH_TELEGRAM__BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, env = "WATCH_TELEGRAM__CHAT_ID")]
    pub chat_id: Option<String>,
}

impl TelegramArgs {
    pub fn to_config(&self) -> Result<TelegramConfig> {
        let bot_token = self
            .bot_token
            .clone()
            .context("--bot-token (or WATCH_TELEGRAM__BOT_TOKEN) is required with --notify")?;
        let chat_id = self
            .chat_id
            .clone()
            .context("--chat-id (or WATCH_TELEGRAM__CHAT_ID) is required with --notify")?;

        Ok(TelegramConfig {
            bot_token,
            chat_id,
            api_url: "https://api.telegram.org".to_string(),
            timeout_secs: 30,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let saved = config::Config::load()?;
    let format = cli.format.or(saved.default_format).unwrap_or_default();

    match cli.command {
        Commands::Status => {
            let api_url = cli
                .api_url
                .or_else(|| saved.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, format).await?;
        }
        Commands::Check {
            metrics,
            notify,
            timeout_secs,
            store,
            detection,
            telegram,
        } => {
            let telegram = if notify {
                Some(telegram.to_config()?)
            } else {
                None
            };
            check::run_check(
                metrics,
                &store,
                &detection,
                telegram,
                Duration::from_secs(timeout_secs),
                format,
            )
            .await?;
        }
        Commands::Bounds {
            metric,
            tail,
            store,
            detection,
        } => {
            bounds::show_bounds(metric, tail, &store, &detection, format).await?;
        }
        Commands::Config {
            set_api_url,
            set_format,
        } => {
            commands::update_config(saved, set_api_url, set_format, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_must_be_positive() {
        assert_eq!(parse_window("5"), Ok(5));
        assert!(parse_window("0").is_err());
        assert!(parse_window("-1").is_err());
    }

    #[test]
    fn test_multiplier_rejects_negative_and_non_finite() {
        assert_eq!(parse_multiplier("1.5"), Ok(1.5));
        assert_eq!(parse_multiplier("0"), Ok(0.0));
        assert!(parse_multiplier("-3").is_err());
        assert!(parse_multiplier("NaN").is_err());
        assert!(parse_multiplier("inf").is_err());
    }

    #[test]
    fn test_estimator_flags_parse() {
        let cli = Cli::try_parse_from(["mwctl", "bounds", "views", "--window", "7", "--multiplier", "2"])
            .unwrap();
        let Commands::Bounds { detection, .. } = cli.command else {
            panic!("expected bounds command");
        };
        assert_eq!(detection.classifier().estimator().trailing_window, 7);
        assert_eq!(detection.classifier().estimator().iqr_multiplier, 2.0);

        assert!(Cli::try_parse_from(["mwctl", "check", "--multiplier=-3"]).is_err());
    }
}
