//! Per-stream metrics tracking
//!
//! Latency is a smoothed estimate: the average is an exponential moving
//! average over flush latencies and the percentiles are scaled from the most
//! recent flush. Throughput is measured over a trailing one-minute window of
//! accepted records.

use realtime_pipeline_types::{
    BackpressureState, ErrorMetrics, LatencyMetrics, PredictionCounters, StreamMetrics,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Trailing window for throughput
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Granularity of the throughput window
const THROUGHPUT_BUCKET: Duration = Duration::from_secs(1);

/// Weight of the newest flush latency in the moving average
const LATENCY_SMOOTHING: f64 = 0.2;

const P95_FACTOR: f64 = 1.5;
const P99_FACTOR: f64 = 2.0;

/// Counts accepted records in one-second buckets over the trailing window
#[derive(Debug, Default)]
struct ThroughputWindow {
    buckets: VecDeque<(Instant, u64)>,
}

impl ThroughputWindow {
    fn record(&mut self, now: Instant) {
        match self.buckets.back_mut() {
            Some((start, count)) if now.duration_since(*start) < THROUGHPUT_BUCKET => *count += 1,
            _ => self.buckets.push_back((now, 1)),
        }
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some((start, _)) = self.buckets.front() {
            if now.duration_since(*start) >= THROUGHPUT_WINDOW {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records per second over the trailing window
    fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let total: u64 = self.buckets.iter().map(|(_, count)| count).sum();
        total as f64 / THROUGHPUT_WINDOW.as_secs_f64()
    }
}

/// Mutable metrics state owned by one stream processor
#[derive(Debug)]
pub struct MetricsTracker {
    stream_id: String,
    predictions: PredictionCounters,
    latency: LatencyMetrics,
    latency_samples: u64,
    errors_by_type: HashMap<String, u64>,
    backpressure_active: bool,
    throughput: ThroughputWindow,
}

impl MetricsTracker {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            predictions: PredictionCounters::default(),
            latency: LatencyMetrics::default(),
            latency_samples: 0,
            errors_by_type: HashMap::new(),
            backpressure_active: false,
            throughput: ThroughputWindow::default(),
        }
    }

    /// Count an accepted record
    pub fn record_ingest(&mut self, now: Instant) {
        self.throughput.record(now);
    }

    /// Fold one flush into the counters and latency estimate
    pub fn record_batch(&mut self, successful: u64, failure_kinds: &[&str], latency_ms: f64) {
        let failed = failure_kinds.len() as u64;
        for kind in failure_kinds {
            *self.errors_by_type.entry(kind.to_string()).or_insert(0) += 1;
        }

        self.predictions.total += successful + failed;
        self.predictions.successful += successful;
        self.predictions.failed += failed;

        self.latency.avg = if self.latency_samples == 0 {
            latency_ms
        } else {
            self.latency.avg * (1.0 - LATENCY_SMOOTHING) + latency_ms * LATENCY_SMOOTHING
        };
        self.latency_samples += 1;
        self.latency.p50 = latency_ms;
        self.latency.p95 = latency_ms * P95_FACTOR;
        self.latency.p99 = latency_ms * P99_FACTOR;
    }

    pub fn set_backpressure_active(&mut self, active: bool) {
        self.backpressure_active = active;
    }

    /// Smoothed flush latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        self.latency.avg
    }

    /// Cumulative failed/total prediction ratio
    pub fn error_rate(&self) -> f64 {
        if self.predictions.total == 0 {
            0.0
        } else {
            self.predictions.failed as f64 / self.predictions.total as f64
        }
    }

    /// Build an owned snapshot
    pub fn snapshot(&mut self, buffer_size: usize, buffer_utilization: f64) -> StreamMetrics {
        StreamMetrics {
            stream_id: self.stream_id.clone(),
            throughput: self.throughput.rate(Instant::now()),
            latency: self.latency.clone(),
            errors: ErrorMetrics {
                count: self.predictions.failed,
                rate: self.error_rate(),
                by_type: self.errors_by_type.clone(),
            },
            backpressure: BackpressureState {
                active: self.backpressure_active,
                buffer_utilization,
            },
            buffer_size,
            predictions: self.predictions,
            last_updated: Utc::now(),
        }
    }
}
