//! Configuration management for the real-time inference pipeline
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables prefixed with `RTP_` (nested keys separated by
//! `__`, e.g. `RTP_STREAM_DEFAULTS__BATCH_SIZE=50`).

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use realtime_pipeline_types::{
    AlertAction, AlertActionType, AlertRule, AlertSeverity, BackpressureStrategy,
    ComparisonOperator, StreamConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RTP_";

/// Metric name carrying a stream's error rate (0.0 - 1.0)
pub const ERROR_RATE_METRIC: &str = "error_rate";

/// Metric name carrying a stream's average flush latency in milliseconds
pub const AVG_LATENCY_METRIC: &str = "avg_latency_ms";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Service configuration
    pub service: ServiceConfig,

    /// Defaults applied to streams created from configuration
    pub stream_defaults: StreamDefaults,

    /// Batch job settings
    pub batch: BatchSettings,

    /// Alert engine settings and default rules
    pub alerting: AlertingSettings,

    /// Inference backend endpoint
    pub inference: InferenceSettings,

    /// Notification transports
    pub notifications: NotificationSettings,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl PipelineConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Extract configuration from a prepared figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service.event_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "service.event_channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.stream_defaults.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "stream_defaults.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.stream_defaults.window_size_ms == 0 {
            return Err(ConfigError::ValidationError(
                "stream_defaults.window_size_ms must be greater than 0".to_string(),
            ));
        }

        if self.batch.default_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch.default_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.alerting.history_retention_secs == 0 {
            return Err(ConfigError::ValidationError(
                "alerting.history_retention_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &self.alerting.default_rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate default alert rule id: {}",
                    rule.id
                )));
            }
        }

        Ok(())
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Capacity of each component's broadcast event channel
    pub event_channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "realtime-pipeline".to_string(),
            event_channel_capacity: 1024,
        }
    }
}

/// Stream defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDefaults {
    pub batch_size: usize,
    pub window_size_ms: u64,
    pub watermark_interval_ms: u64,
    pub parallelism: usize,
    pub backpressure_strategy: BackpressureStrategy,
    pub checkpoint_interval_ms: u64,
    pub retention_period_ms: u64,
    pub max_buffer_size: Option<usize>,
    pub throttle_delay_ms: u64,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        let base = StreamConfig::new("defaults", "defaults");
        Self {
            batch_size: base.batch_size,
            window_size_ms: base.window_size_ms,
            watermark_interval_ms: base.watermark_interval_ms,
            parallelism: base.parallelism,
            backpressure_strategy: base.backpressure_strategy,
            checkpoint_interval_ms: base.checkpoint_interval_ms,
            retention_period_ms: base.retention_period_ms,
            max_buffer_size: base.max_buffer_size,
            throttle_delay_ms: base.throttle_delay_ms,
        }
    }
}

impl StreamDefaults {
    /// Build a stream configuration from these defaults
    pub fn stream_config(
        &self,
        stream_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> StreamConfig {
        StreamConfig {
            stream_id: stream_id.into(),
            model_id: model_id.into(),
            batch_size: self.batch_size,
            window_size_ms: self.window_size_ms,
            watermark_interval_ms: self.watermark_interval_ms,
            parallelism: self.parallelism,
            backpressure_strategy: self.backpressure_strategy,
            checkpoint_interval_ms: self.checkpoint_interval_ms,
            retention_period_ms: self.retention_period_ms,
            max_buffer_size: self.max_buffer_size,
            throttle_delay_ms: self.throttle_delay_ms,
        }
    }
}

/// Batch job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Slice size used when a job does not specify one
    pub default_batch_size: usize,

    /// Pause between slices in milliseconds
    pub slice_yield_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            default_batch_size: 1_000,
            slice_yield_ms: 10,
        }
    }
}

/// Alert engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingSettings {
    /// Retention of per-metric sample history in seconds
    pub history_retention_secs: u64,

    /// Number of fired alerts kept for inspection
    pub recent_alerts_capacity: usize,

    /// Rules registered when the service initializes
    pub default_rules: Vec<AlertRule>,
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            history_retention_secs: 300,
            recent_alerts_capacity: 100,
            default_rules: default_alert_rules(None),
        }
    }
}

/// Built-in alert rules: stream error rate and average latency
///
/// Both rules notify through a webhook action (pointing at `webhook_url` when
/// given) and stay silent for five minutes after firing.
pub fn default_alert_rules(webhook_url: Option<&str>) -> Vec<AlertRule> {
    let webhook = AlertAction::new(
        AlertActionType::Webhook,
        serde_json::json!({ "url": webhook_url.unwrap_or("http://localhost:9000/alerts") }),
    );

    vec![
        AlertRule::new(
            "high-error-rate",
            "High Error Rate",
            ERROR_RATE_METRIC,
            ComparisonOperator::Gt,
            0.05,
            AlertSeverity::High,
        )
        .with_description("Stream error rate exceeded 5% over 5 minutes")
        .with_time_window_ms(5 * 60 * 1_000)
        .with_action(webhook.clone())
        .with_cooldown_ms(5 * 60 * 1_000),
        AlertRule::new(
            "high-latency",
            "High Latency",
            AVG_LATENCY_METRIC,
            ComparisonOperator::Gt,
            100.0,
            AlertSeverity::Medium,
        )
        .with_description("Average stream latency exceeded 100ms over 5 minutes")
        .with_time_window_ms(5 * 60 * 1_000)
        .with_action(webhook)
        .with_cooldown_ms(5 * 60 * 1_000),
    ]
}

/// Inference backend endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Base URL of the inference service
    pub base_url: String,

    /// Bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8500".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Notification transports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// PagerDuty Events API endpoint
    pub pagerduty_url: String,

    /// HTTP relay accepting email notifications
    pub email_relay_url: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            pagerduty_url: "https://events.pagerduty.com/v2/enqueue".to_string(),
            email_relay_url: None,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,

    /// Enable structured JSON logging
    pub json_logging: bool,

    /// Register OpenTelemetry instruments for streams
    pub telemetry_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            telemetry_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.stream_defaults.batch_size, 100);
        assert_eq!(config.alerting.default_rules.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.stream_defaults.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.service.event_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        let duplicate = config.alerting.default_rules[0].clone();
        config.alerting.default_rules.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_rules() {
        let rules = default_alert_rules(Some("http://hooks.internal/alerts"));
        let error_rule = rules.iter().find(|r| r.id == "high-error-rate").unwrap();
        assert_eq!(error_rule.condition.metric, ERROR_RATE_METRIC);
        assert_eq!(error_rule.condition.threshold, 0.05);
        assert_eq!(error_rule.severity, AlertSeverity::High);
        assert_eq!(error_rule.cooldown_ms, 300_000);
        assert_eq!(
            error_rule.actions[0].config["url"],
            "http://hooks.internal/alerts"
        );

        let latency_rule = rules.iter().find(|r| r.id == "high-latency").unwrap();
        assert_eq!(latency_rule.condition.metric, AVG_LATENCY_METRIC);
        assert_eq!(latency_rule.severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_stream_config_from_defaults() {
        let defaults = StreamDefaults {
            batch_size: 25,
            backpressure_strategy: BackpressureStrategy::Throttle,
            ..Default::default()
        };
        let stream = defaults.stream_config("orders", "fraud-v2");
        assert_eq!(stream.stream_id, "orders");
        assert_eq!(stream.batch_size, 25);
        assert_eq!(stream.backpressure_strategy, BackpressureStrategy::Throttle);
        assert!(stream.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stream_defaults:\n  batch_size: 32\n  backpressure_strategy: buffer\nbatch:\n  slice_yield_ms: 0\n"
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.stream_defaults.batch_size, 32);
        assert_eq!(
            config.stream_defaults.backpressure_strategy,
            BackpressureStrategy::Buffer
        );
        assert_eq!(config.batch.slice_yield_ms, 0);
        assert_eq!(config.batch.default_batch_size, 1_000);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = PipelineConfig::load(Some(PathBuf::from("/nonexistent/rtp.yaml")));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RTP_STREAM_DEFAULTS__BATCH_SIZE", "7");
            jail.set_env("RTP_OBSERVABILITY__JSON_LOGGING", "true");

            let config = PipelineConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.stream_defaults.batch_size, 7);
            assert!(config.observability.json_logging);
            Ok(())
        });
    }
}
