//! Agent configuration
//!
//! Settings are read from an optional TOML file named by
//! `METRIC_WATCH_CONFIG`, then overridden by `WATCH_*` environment
//! variables. Nested keys use `__`, e.g. `WATCH_CLICKHOUSE__URL` or
//! `WATCH_DETECTION__METRICS=views,likes`.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{de, Deserialize, Deserializer};
use watch_lib::{
    anomaly::{AnomalyClassifier, BoundEstimator},
    notify::TelegramConfig,
    pipeline::{DispatchMode, PipelineConfig, RetryPolicy},
    source::ClickHouseConfig,
    MetricId,
};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "METRIC_WATCH_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to log records
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub clickhouse: ClickHouseConfig,

    /// Alerts are only logged when unset
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// What is evaluated and how
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// A list in the file, or comma-separated in the environment
    #[serde(default = "default_metrics", deserialize_with = "metric_list")]
    pub metrics: Vec<MetricId>,
    #[serde(default = "default_bucket_width_secs")]
    pub bucket_width_secs: u64,
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
    /// Preceding buckets per estimate (`n`)
    #[serde(default = "default_trailing_window")]
    pub trailing_window: usize,
    /// Dispersion multiplier (`a`)
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    #[serde(default = "default_delivery_retries")]
    pub delivery_retries: u32,
    #[serde(default = "default_delivery_retry_delay_secs")]
    pub delivery_retry_delay_secs: u64,
}

/// When runs happen
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Runs start on multiples of this interval
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Time a run may spend on detection
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Reruns when every metric failed on an unreachable store
    #[serde(default = "default_job_retries")]
    pub job_retries: u32,
    #[serde(default = "default_job_retry_delay_secs")]
    pub job_retry_delay_secs: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "metric-watch".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_metrics() -> Vec<MetricId> {
    MetricId::DEFAULT_SET.to_vec()
}

fn metric_list<'de, D>(deserializer: D) -> Result<Vec<MetricId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<MetricId>),
        Csv(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(metrics) => Ok(metrics),
        Raw::Csv(names) => names
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(|name| name.parse().map_err(de::Error::custom))
            .collect(),
    }
}

fn default_bucket_width_secs() -> u64 {
    watch_lib::DEFAULT_BUCKET_WIDTH.as_secs()
}

fn default_lookback_secs() -> u64 {
    watch_lib::DEFAULT_LOOKBACK.as_secs()
}

fn default_trailing_window() -> usize {
    watch_lib::anomaly::DEFAULT_TRAILING_WINDOW
}

fn default_iqr_multiplier() -> f64 {
    watch_lib::anomaly::DEFAULT_IQR_MULTIPLIER
}

fn default_delivery_retries() -> u32 {
    2
}

fn default_delivery_retry_delay_secs() -> u64 {
    2
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_run_deadline_secs() -> u64 {
    10 * 60
}

fn default_job_retries() -> u32 {
    2
}

fn default_job_retry_delay_secs() -> u64 {
    5 * 60
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics(),
            bucket_width_secs: default_bucket_width_secs(),
            lookback_secs: default_lookback_secs(),
            trailing_window: default_trailing_window(),
            iqr_multiplier: default_iqr_multiplier(),
            delivery_retries: default_delivery_retries(),
            delivery_retry_delay_secs: default_delivery_retry_delay_secs(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            job_retries: default_job_retries(),
            job_retry_delay_secs: default_job_retry_delay_secs(),
        }
    }
}

impl DetectionConfig {
    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_width_secs)
    }

    pub fn classifier(&self) -> AnomalyClassifier {
        AnomalyClassifier::new(BoundEstimator::new(
            self.trailing_window,
            self.iqr_multiplier,
        ))
    }

    /// Pipeline settings delivering to `channel`
    pub fn pipeline_config(&self, channel: &str, mode: DispatchMode) -> PipelineConfig {
        PipelineConfig {
            metrics: self.metrics.clone(),
            lookback: Duration::from_secs(self.lookback_secs),
            channel: channel.to_string(),
            delivery_retry: RetryPolicy::new(
                self.delivery_retries,
                Duration::from_secs(self.delivery_retry_delay_secs),
            ),
            mode,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn job_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.job_retries,
            Duration::from_secs(self.job_retry_delay_secs),
        )
    }
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::from_sources(path.as_deref().map(Path::new), environment())
    }

    /// Layer `env` over the optional TOML file at `path`
    pub fn from_sources(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let agent_config: AgentConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        agent_config.validate()?;
        Ok(agent_config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.metrics.is_empty() {
            bail!("detection.metrics must name at least one metric");
        }
        if d.bucket_width_secs == 0 {
            bail!("detection.bucket_width_secs must be positive");
        }
        if d.lookback_secs < d.bucket_width_secs {
            bail!("detection.lookback_secs must cover at least one bucket");
        }
        if d.trailing_window == 0 {
            bail!("detection.trailing_window must be at least 1");
        }
        if !d.iqr_multiplier.is_finite() || d.iqr_multiplier < 0.0 {
            bail!("detection.iqr_multiplier must be a non-negative number");
        }

        let s = &self.schedule;
        if s.interval_secs == 0 {
            bail!("schedule.interval_secs must be positive");
        }
        if s.run_deadline_secs == 0 {
            bail!("schedule.run_deadline_secs must be positive");
        }

        if let Some(ref telegram) = self.telegram {
            if telegram.bot_token.is_empty() || telegram.chat_id.is_empty() {
                bail!("telegram.bot_token and telegram.chat_id are both required");
            }
        }
        Ok(())
    }
}

/// `WATCH_*` environment source.
///
/// Values stay strings until deserialized, so credentials such as
/// `00123` reach the client unchanged.
pub fn environment() -> config::Environment {
    config::Environment::with_prefix("WATCH")
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = AgentConfig::from_sources(None, env(&[])).unwrap();

        assert_eq!(config.api_port, 8080);
        assert!(config.telegram.is_none());
        assert_eq!(config.detection.metrics, MetricId::DEFAULT_SET.to_vec());
        assert_eq!(config.detection.bucket_width_secs, 900);
        assert_eq!(config.detection.trailing_window, 5);
        assert_eq!(config.schedule.job_retries, 2);
        assert_eq!(config.schedule.job_retry_delay_secs, 300);
        assert_eq!(config.clickhouse.url, "http://localhost:8123");
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_sources(
            None,
            env(&[
                ("WATCH_API_PORT", "9100"),
                ("WATCH_CLICKHOUSE__DATABASE", "simulator"),
                ("WATCH_DETECTION__METRICS", "views,ctr"),
                ("WATCH_DETECTION__IQR_MULTIPLIER", "2.5"),
                ("WATCH_TELEGRAM__BOT_TOKEN", "123:abc"),
                ("WATCH_TELEGRAM__CHAT_ID", "@alerts"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.clickhouse.database, "simulator");
        assert_eq!(config.detection.metrics, vec![MetricId::Views, MetricId::Ctr]);
        assert_eq!(config.detection.iqr_multiplier, 2.5);
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.chat_id, "@alerts");
        assert_eq!(telegram.api_url, "https://api.telegram.org");
    }

    #[test]
    fn test_numeric_looking_credentials_are_kept_verbatim() {
        let config = AgentConfig::from_sources(
            None,
            env(&[
                ("WATCH_CLICKHOUSE__USER", "1e3"),
                ("WATCH_CLICKHOUSE__PASSWORD", "00123"),
                ("WATCH_TELEGRAM__BOT_TOKEN", "0042:abc"),
                ("WATCH_TELEGRAM__CHAT_ID", "-1001234567890"),
            ]),
        )
        .unwrap();

        assert_eq!(config.clickhouse.user, "1e3");
        assert_eq!(config.clickhouse.password.as_deref(), Some("00123"));
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.bot_token, "0042:abc");
        assert_eq!(telegram.chat_id, "-1001234567890");
    }

    #[test]
    fn test_metrics_list_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[detection]\nmetrics = [\"likes\", \"messages_sent\"]").unwrap();

        let config = AgentConfig::from_sources(Some(file.path()), env(&[])).unwrap();

        assert_eq!(
            config.detection.metrics,
            vec![MetricId::Likes, MetricId::MessagesSent]
        );
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_port = 7000\n\n[schedule]\ninterval_secs = 300\n\n[detection]\ntrailing_window = 7"
        )
        .unwrap();

        let config = AgentConfig::from_sources(
            Some(file.path()),
            env(&[("WATCH_SCHEDULE__INTERVAL_SECS", "600")]),
        )
        .unwrap();

        assert_eq!(config.api_port, 7000);
        assert_eq!(config.detection.trailing_window, 7);
        assert_eq!(config.schedule.interval_secs, 600);
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let result = AgentConfig::from_sources(None, env(&[("WATCH_DETECTION__METRICS", "clicks")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let result =
            AgentConfig::from_sources(None, env(&[("WATCH_DETECTION__TRAILING_WINDOW", "0")]));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("trailing_window"));
    }

    #[test]
    fn test_pipeline_config_from_detection() {
        let detection = DetectionConfig::default();
        let pipeline = detection.pipeline_config("-100", DispatchMode::Notify);

        assert_eq!(pipeline.channel, "-100");
        assert_eq!(pipeline.lookback, Duration::from_secs(86_400));
        assert_eq!(pipeline.delivery_retry.max_retries, 2);
        assert_eq!(detection.classifier().estimator().trailing_window, 5);
    }
}
