//! Stream configuration, buffered records and stream metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{PipelineError, Result};

/// Strategy applied when a stream buffer reaches twice its batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    /// Evict the oldest 10% of buffered records
    #[default]
    Drop,
    /// Keep buffering up to the configured ceiling, warning on every overflow
    Buffer,
    /// Signal a suggested delay to the caller
    Throttle,
}

impl BackpressureStrategy {
    /// Get strategy name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Buffer => "buffer",
            Self::Throttle => "throttle",
        }
    }
}

/// Stream configuration, fixed for the lifetime of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier
    pub stream_id: String,
    /// Target model identifier
    pub model_id: String,
    /// Maximum records per flush
    pub batch_size: usize,
    /// Maximum milliseconds between flushes
    pub window_size_ms: u64,
    /// Watermark interval in milliseconds
    #[serde(default = "default_watermark_interval_ms")]
    pub watermark_interval_ms: u64,
    /// Maximum concurrently pending inference calls per flush (0 = unbounded)
    #[serde(default)]
    pub parallelism: usize,
    /// Backpressure strategy
    #[serde(default)]
    pub backpressure_strategy: BackpressureStrategy,
    /// Checkpoint interval in milliseconds
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Retention period in milliseconds
    #[serde(default = "default_retention_period_ms")]
    pub retention_period_ms: u64,
    /// Absolute buffer ceiling for the `buffer` and `throttle` strategies (defaults to 10x batch size)
    #[serde(default)]
    pub max_buffer_size: Option<usize>,
    /// Delay suggested to callers by the `throttle` strategy
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,
}

fn default_watermark_interval_ms() -> u64 {
    1_000
}

fn default_checkpoint_interval_ms() -> u64 {
    60_000
}

fn default_retention_period_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

fn default_throttle_delay_ms() -> u64 {
    100
}

impl StreamConfig {
    /// Create a stream configuration with default batching settings
    pub fn new(stream_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            model_id: model_id.into(),
            batch_size: 100,
            window_size_ms: 1_000,
            watermark_interval_ms: default_watermark_interval_ms(),
            parallelism: 0,
            backpressure_strategy: BackpressureStrategy::default(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            retention_period_ms: default_retention_period_ms(),
            max_buffer_size: None,
            throttle_delay_ms: default_throttle_delay_ms(),
        }
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set window size in milliseconds
    pub fn with_window_size_ms(mut self, window_size_ms: u64) -> Self {
        self.window_size_ms = window_size_ms;
        self
    }

    /// Set backpressure strategy
    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure_strategy = strategy;
        self
    }

    /// Set checkpoint interval in milliseconds
    pub fn with_checkpoint_interval_ms(mut self, interval_ms: u64) -> Self {
        self.checkpoint_interval_ms = interval_ms;
        self
    }

    /// Set per-flush parallelism
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the absolute buffer ceiling
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = Some(max_buffer_size);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "stream_id must not be empty".to_string(),
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model_id must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.window_size_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_size_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(ceiling) = self.max_buffer_size {
            if ceiling < self.backpressure_threshold() {
                return Err(PipelineError::InvalidConfig(format!(
                    "max_buffer_size ({}) must be at least twice batch_size ({})",
                    ceiling, self.batch_size
                )));
            }
        }
        Ok(())
    }

    /// Buffer size at which backpressure engages
    pub fn backpressure_threshold(&self) -> usize {
        self.batch_size.saturating_mul(2)
    }

    /// Absolute buffer ceiling under the `buffer` and `throttle` strategies
    pub fn buffer_ceiling(&self) -> usize {
        self.max_buffer_size
            .unwrap_or_else(|| self.batch_size.saturating_mul(10))
    }

    /// Flush window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_size_ms)
    }

    /// Checkpoint interval as a duration
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Throttle delay as a duration
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }
}

/// A record waiting in a stream buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRecord {
    /// Generated record identifier
    pub id: Uuid,
    /// Opaque payload
    pub data: serde_json::Value,
    /// Ingestion timestamp
    pub timestamp: DateTime<Utc>,
}

impl BufferedRecord {
    /// Wrap a payload, stamping it with a fresh id and the current time
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Latency distribution estimate in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
}

/// Error counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    /// Total failed predictions
    pub count: u64,
    /// Failed predictions divided by total predictions
    pub rate: f64,
    /// Failures keyed by error kind
    pub by_type: HashMap<String, u64>,
}

/// Backpressure state of a stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackpressureState {
    /// Whether backpressure is currently engaged
    pub active: bool,
    /// Buffer size relative to the backpressure threshold, in percent
    pub buffer_utilization: f64,
}

/// Prediction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionCounters {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Snapshot of a stream's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Stream identifier
    pub stream_id: String,
    /// Records per second over the trailing minute
    pub throughput: f64,
    /// Latency estimate
    pub latency: LatencyMetrics,
    /// Error counters
    pub errors: ErrorMetrics,
    /// Backpressure state
    pub backpressure: BackpressureState,
    /// Records currently buffered
    pub buffer_size: usize,
    /// Prediction counters
    pub predictions: PredictionCounters,
    /// When this snapshot was produced
    pub last_updated: DateTime<Utc>,
}

impl StreamMetrics {
    /// Create empty metrics for a stream
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            throughput: 0.0,
            latency: LatencyMetrics::default(),
            errors: ErrorMetrics::default(),
            backpressure: BackpressureState::default(),
            buffer_size: 0,
            predictions: PredictionCounters::default(),
            last_updated: Utc::now(),
        }
    }

    /// Success ratio over all predictions (1.0 when nothing was predicted yet)
    pub fn success_rate(&self) -> f64 {
        if self.predictions.total == 0 {
            1.0
        } else {
            self.predictions.successful as f64 / self.predictions.total as f64
        }
    }
}
