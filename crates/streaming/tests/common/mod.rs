//! Common test utilities for stream processor tests

#![allow(dead_code)]

use async_trait::async_trait;
use realtime_pipeline_types::{
    Alert, BackpressureStrategy, InferenceBackend, MetricsStore, PipelineError, Prediction,
    Result, StreamConfig, StreamMetrics,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streaming::StreamEvent;
use tokio::sync::{broadcast, Semaphore};

/// Inference backend that records every call
///
/// Inputs containing `"fail":true` are rejected. When gated, every call waits
/// for a permit before answering.
#[derive(Default)]
pub struct MockInference {
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Calls block until `release` is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for MockInference {
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if input.contains("\"fail\":true") {
            return Err(PipelineError::Inference("model rejected input".to_string()));
        }
        Ok(Prediction::new(model_id, json!({ "label": "ok" })).with_confidence(0.9))
    }
}

/// Metrics store keeping snapshots in memory, optionally failing every write
#[derive(Default)]
pub struct MockStore {
    fail: bool,
    snapshots: Mutex<Vec<StreamMetrics>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn snapshots(&self) -> Vec<StreamMetrics> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsStore for MockStore {
    async fn save_metrics_snapshot(
        &self,
        _stream_id: &str,
        _model_id: &str,
        metrics: &StreamMetrics,
    ) -> Result<()> {
        if self.fail {
            return Err(PipelineError::Persistence("store unavailable".to_string()));
        }
        self.snapshots.lock().unwrap().push(metrics.clone());
        Ok(())
    }

    async fn save_audit_record(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }
}

/// Stream config with a long window so flushes only happen on full batches or stop
pub fn test_stream_config(batch_size: usize, strategy: BackpressureStrategy) -> StreamConfig {
    StreamConfig::new("test-stream", "test-model")
        .with_batch_size(batch_size)
        .with_window_size_ms(60_000)
        .with_backpressure(strategy)
        .with_checkpoint_interval_ms(3_600_000)
}

/// Wait for a condition with timeout
pub async fn wait_for_condition<F>(mut check: F, timeout: Duration, check_interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(check_interval).await;
    }
    false
}

/// Receive events until one with the given name arrives
pub async fn next_event_named(
    rx: &mut broadcast::Receiver<StreamEvent>,
    name: &str,
    timeout: Duration,
) -> Option<StreamEvent> {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.name() == name => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
