//! Common test utilities for batch processor tests

#![allow(dead_code)]

use async_trait::async_trait;
use batch::{BatchEvent, BatchProcessor, BatchProcessorConfig, BatchSource};
use realtime_pipeline_types::{InferenceBackend, PipelineError, Prediction, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Inference backend rejecting inputs that contain `"fail":true`
#[derive(Default)]
pub struct MockInference {
    calls: AtomicUsize,
    delay: Option<Duration>,
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

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for MockInference {
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if input.contains("\"fail\":true") {
            return Err(PipelineError::Inference("model rejected input".to_string()));
        }
        Ok(Prediction::new(model_id, json!({ "echo": input })))
    }
}

/// Source whose size cannot be determined
pub struct UnreachableSource;

#[async_trait]
impl BatchSource for UnreachableSource {
    async fn total(&self) -> Result<usize> {
        Err(PipelineError::Source("connection refused".to_string()))
    }

    async fn read_slice(&self, _offset: usize, _len: usize) -> Result<Vec<Value>> {
        Err(PipelineError::Source("connection refused".to_string()))
    }
}

/// Source of `total` items whose slice starting at `failing_offset` cannot be read
pub struct FlakySource {
    pub total: usize,
    pub failing_offset: usize,
}

#[async_trait]
impl BatchSource for FlakySource {
    async fn total(&self) -> Result<usize> {
        Ok(self.total)
    }

    async fn read_slice(&self, offset: usize, len: usize) -> Result<Vec<Value>> {
        if offset == self.failing_offset {
            return Err(PipelineError::Source(format!("corrupt slice at {}", offset)));
        }
        Ok((offset..offset + len).map(|i| json!({ "index": i })).collect())
    }
}

/// Source of `total` items that returns one item fewer than requested per slice
pub struct ShortReadSource {
    pub total: usize,
}

#[async_trait]
impl BatchSource for ShortReadSource {
    async fn total(&self) -> Result<usize> {
        Ok(self.total)
    }

    async fn read_slice(&self, offset: usize, len: usize) -> Result<Vec<Value>> {
        Ok((offset..offset + len.saturating_sub(1))
            .map(|i| json!({ "index": i }))
            .collect())
    }
}

/// Batch processor with a short slice pause
pub fn test_processor(inference: Arc<MockInference>) -> BatchProcessor {
    BatchProcessor::with_config(
        inference,
        BatchProcessorConfig {
            slice_yield: Duration::from_millis(1),
            ..Default::default()
        },
    )
}

/// Collect events until `count` events named `name` have arrived
pub async fn collect_until(
    rx: &mut broadcast::Receiver<BatchEvent>,
    name: &str,
    count: usize,
    timeout: Duration,
) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    let mut seen = 0;
    let _ = tokio::time::timeout(timeout, async {
        while seen < count {
            match rx.recv().await {
                Ok(event) => {
                    if event.name() == name {
                        seen += 1;
                    }
                    events.push(event);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;
    events
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
