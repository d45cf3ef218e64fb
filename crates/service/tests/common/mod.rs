//! Common test utilities for service tests

#![allow(dead_code)]

use async_trait::async_trait;
use integrations::{InMemoryMetricsStore, LogNotifier};
use realtime_pipeline_config::PipelineConfig;
use realtime_pipeline_types::{
    BackpressureStrategy, InferenceBackend, PipelineError, Prediction, Result, StreamConfig,
};
use realtime_service::{RealTimeProcessingService, ServiceEvent};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Inference backend rejecting inputs that contain `"fail":true`
#[derive(Default)]
pub struct MockInference {
    calls: AtomicUsize,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for MockInference {
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.contains("\"fail\":true") {
            return Err(PipelineError::Inference("model rejected input".to_string()));
        }
        Ok(Prediction::new(model_id, json!({ "label": "ok" })))
    }
}

/// Test configuration with short batch pauses
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.slice_yield_ms = 1;
    config.batch.default_batch_size = 5;
    config
}

pub struct TestService {
    pub service: RealTimeProcessingService,
    pub inference: Arc<MockInference>,
    pub store: Arc<InMemoryMetricsStore>,
}

pub fn test_service(config: PipelineConfig) -> TestService {
    let inference = Arc::new(MockInference::new());
    let store = Arc::new(InMemoryMetricsStore::new());
    let service = RealTimeProcessingService::new(
        config,
        inference.clone(),
        store.clone(),
        Arc::new(LogNotifier),
    )
    .expect("valid test config");
    TestService {
        service,
        inference,
        store,
    }
}

/// Stream config with a long checkpoint interval
pub fn stream_config(stream_id: &str, batch_size: usize) -> StreamConfig {
    StreamConfig::new(stream_id, "test-model")
        .with_batch_size(batch_size)
        .with_window_size_ms(1_000)
        .with_backpressure(BackpressureStrategy::Drop)
        .with_checkpoint_interval_ms(3_600_000)
}

/// Receive events until one named `name` arrives
pub async fn next_event_named(
    rx: &mut broadcast::Receiver<ServiceEvent>,
    name: &str,
    timeout: Duration,
) -> Option<ServiceEvent> {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.name() == name => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drain whatever events arrive within `window`
pub async fn collect_names(
    rx: &mut broadcast::Receiver<ServiceEvent>,
    window: Duration,
) -> Vec<&'static str> {
    let mut names = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Ok(event) = rx.recv().await {
            names.push(event.name());
        }
    })
    .await;
    names
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
