//! In-memory metrics store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use realtime_pipeline_types::{Alert, MetricsStore, Result, StreamMetrics};
use std::collections::VecDeque;
use tracing::debug;

/// Default number of entries kept per kind
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A persisted metrics checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub stream_id: String,
    pub model_id: String,
    pub metrics: StreamMetrics,
    pub saved_at: DateTime<Utc>,
}

/// Bounded store keeping the newest checkpoints and audit records in memory
pub struct InMemoryMetricsStore {
    capacity: usize,
    snapshots: Mutex<VecDeque<StoredSnapshot>>,
    audits: Mutex<VecDeque<Alert>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: Mutex::new(VecDeque::new()),
            audits: Mutex::new(VecDeque::new()),
        }
    }

    /// Stored checkpoints, oldest first
    pub fn snapshots(&self) -> Vec<StoredSnapshot> {
        self.snapshots.lock().iter().cloned().collect()
    }

    /// Newest checkpoint of a stream
    pub fn latest_snapshot(&self, stream_id: &str) -> Option<StoredSnapshot> {
        self.snapshots
            .lock()
            .iter()
            .rev()
            .find(|s| s.stream_id == stream_id)
            .cloned()
    }

    /// Stored audit records, oldest first
    pub fn audit_records(&self) -> Vec<Alert> {
        self.audits.lock().iter().cloned().collect()
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    queue.push_back(item);
    while queue.len() > capacity {
        queue.pop_front();
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn save_metrics_snapshot(
        &self,
        stream_id: &str,
        model_id: &str,
        metrics: &StreamMetrics,
    ) -> Result<()> {
        debug!("Storing metrics snapshot for stream {}", stream_id);
        let snapshot = StoredSnapshot {
            stream_id: stream_id.to_string(),
            model_id: model_id.to_string(),
            metrics: metrics.clone(),
            saved_at: Utc::now(),
        };
        push_bounded(&mut self.snapshots.lock(), snapshot, self.capacity);
        Ok(())
    }

    async fn save_audit_record(&self, alert: &Alert) -> Result<()> {
        debug!("Storing audit record for alert {}", alert.id);
        push_bounded(&mut self.audits.lock(), alert.clone(), self.capacity);
        Ok(())
    }
}
