//! Backpressure Handling
//!
//! This module decides what happens when a stream buffer holds twice its batch
//! size: evict the oldest records, keep buffering up to an absolute ceiling,
//! or signal a delay to the caller. It also tracks buffer level transitions
//! for logging and keeps counters for every action taken.

use realtime_pipeline_types::{BackpressureStrategy, BufferedRecord, StreamConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fraction of the buffer evicted by the drop strategy
const DROP_FRACTION_DIVISOR: usize = 10;

/// Utilization (percent of the engage threshold) at which the level turns to warning
const WARNING_UTILIZATION_PERCENT: f64 = 80.0;

/// Backpressure configuration for one stream
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Strategy applied once the buffer reaches `threshold`
    pub strategy: BackpressureStrategy,
    /// Buffer size at which backpressure engages
    pub threshold: usize,
    /// Absolute buffer ceiling for the buffer and throttle strategies
    pub ceiling: usize,
    /// Delay suggested by the throttle strategy
    pub throttle_delay: Duration,
}

impl From<&StreamConfig> for BackpressureConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            strategy: config.backpressure_strategy,
            threshold: config.backpressure_threshold(),
            ceiling: config.buffer_ceiling(),
            throttle_delay: config.throttle_delay(),
        }
    }
}

/// Buffer utilization level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLevel {
    /// Buffer usage is normal
    Normal,
    /// Buffer is approaching the backpressure threshold
    Warning,
    /// Backpressure is engaged
    Critical,
    /// Buffer reached its absolute ceiling
    Full,
}

impl BufferLevel {
    /// Get level name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Full => "full",
        }
    }

    fn as_index(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Full => 3,
        }
    }
}

/// What the handler did to an engaged buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BackpressureAction {
    /// Oldest records were evicted
    Dropped { count: usize },
    /// Buffer keeps growing; caller is warned
    Warned { utilization: f64 },
    /// Caller should wait before submitting more records
    Throttled { delay_ms: u64 },
    /// Buffer is at its ceiling; the new record must be refused
    Rejected { size: usize, ceiling: usize },
}

/// Backpressure handler statistics
#[derive(Debug, Clone, Default)]
pub struct BackpressureStats {
    /// Current buffer size
    pub current_buffer_size: usize,
    /// Buffer size at which backpressure engages
    pub threshold: usize,
    /// Buffer utilization percentage relative to the threshold
    pub utilization_percent: f64,
    /// Current buffer level
    pub buffer_level: String,
    /// Total records evicted
    pub total_dropped: u64,
    /// Total warnings emitted by the buffer strategy
    pub total_warnings: u64,
    /// Total throttle signals
    pub total_throttled: u64,
    /// Total records refused at the ceiling
    pub total_rejected: u64,
}

/// Backpressure handler
pub struct BackpressureHandler {
    config: BackpressureConfig,
    dropped: AtomicU64,
    warnings: AtomicU64,
    throttled: AtomicU64,
    rejected: AtomicU64,
    /// Current buffer size (tracked separately for metrics)
    current_buffer_size: AtomicUsize,
}

impl BackpressureHandler {
    /// Create new backpressure handler
    pub fn new(config: BackpressureConfig) -> Self {
        debug!(
            "Creating backpressure handler: strategy={}, threshold={}, ceiling={}",
            config.strategy.name(),
            config.threshold,
            config.ceiling
        );

        Self {
            config,
            dropped: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            current_buffer_size: AtomicUsize::new(0),
        }
    }

    /// Whether a buffer of this size has engaged backpressure
    pub fn is_engaged(&self, buffer_size: usize) -> bool {
        buffer_size >= self.config.threshold
    }

    /// Buffer size relative to the engage threshold, in percent
    pub fn utilization(&self, buffer_size: usize) -> f64 {
        if self.config.threshold == 0 {
            return 0.0;
        }
        buffer_size as f64 / self.config.threshold as f64 * 100.0
    }

    /// Check buffer level based on utilization
    pub fn check_buffer_level(&self, buffer_size: usize) -> BufferLevel {
        let bounded = self.config.strategy != BackpressureStrategy::Drop;
        if bounded && buffer_size >= self.config.ceiling {
            BufferLevel::Full
        } else if self.is_engaged(buffer_size) {
            BufferLevel::Critical
        } else if self.utilization(buffer_size) >= WARNING_UTILIZATION_PERCENT {
            BufferLevel::Warning
        } else {
            BufferLevel::Normal
        }
    }

    /// Update current buffer size, logging level changes
    pub fn update_buffer_size(&self, size: usize) {
        let old_size = self.current_buffer_size.swap(size, Ordering::Relaxed);
        let old_level = self.check_buffer_level(old_size);
        let new_level = self.check_buffer_level(size);

        if old_level.as_index() == new_level.as_index() {
            return;
        }

        match new_level {
            BufferLevel::Normal => {
                info!("Buffer level: NORMAL ({}/{})", size, self.config.threshold);
            }
            BufferLevel::Warning => {
                warn!("Buffer level: WARNING ({}/{})", size, self.config.threshold);
            }
            BufferLevel::Critical => {
                warn!("Buffer level: CRITICAL ({}/{})", size, self.config.threshold);
            }
            BufferLevel::Full => {
                error!("Buffer level: FULL ({}/{})", size, self.config.ceiling);
            }
        }
    }

    /// Apply the configured strategy to an engaged buffer, before a new record is appended
    pub fn apply(&self, buffer: &mut VecDeque<BufferedRecord>) -> BackpressureAction {
        match self.config.strategy {
            BackpressureStrategy::Drop => {
                let count = (buffer.len() / DROP_FRACTION_DIVISOR).max(1).min(buffer.len());
                buffer.drain(..count);
                self.dropped.fetch_add(count as u64, Ordering::Relaxed);
                warn!("Dropped {} oldest records (buffer {})", count, buffer.len());
                BackpressureAction::Dropped { count }
            }
            BackpressureStrategy::Buffer | BackpressureStrategy::Throttle
                if buffer.len() >= self.config.ceiling =>
            {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Buffer at ceiling ({}/{}), rejecting record",
                    buffer.len(),
                    self.config.ceiling
                );
                BackpressureAction::Rejected {
                    size: buffer.len(),
                    ceiling: self.config.ceiling,
                }
            }
            BackpressureStrategy::Buffer => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
                let utilization = self.utilization(buffer.len());
                debug!("Buffer over threshold: {:.1}% utilization", utilization);
                BackpressureAction::Warned { utilization }
            }
            BackpressureStrategy::Throttle => {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                let delay_ms = self.config.throttle_delay.as_millis() as u64;
                debug!("Throttling ingestion: suggested delay {}ms", delay_ms);
                BackpressureAction::Throttled { delay_ms }
            }
        }
    }

    /// Get statistics
    pub fn stats(&self) -> BackpressureStats {
        let current_size = self.current_buffer_size.load(Ordering::Relaxed);

        BackpressureStats {
            current_buffer_size: current_size,
            threshold: self.config.threshold,
            utilization_percent: self.utilization(current_size),
            buffer_level: self.check_buffer_level(current_size).name().to_string(),
            total_dropped: self.dropped.load(Ordering::Relaxed),
            total_warnings: self.warnings.load(Ordering::Relaxed),
            total_throttled: self.throttled.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
