//! Stream Processor
//!
//! Buffers incoming records and flushes them through an inference backend in
//! batches, either when a batch fills up or when the window timer fires.
//! Flushes of one stream never overlap, and records are removed from the
//! buffer in arrival order.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use realtime_pipeline_types::{
    BufferedRecord, InferenceBackend, MetricsStore, PipelineError, Prediction, Result,
    StreamConfig, StreamMetrics,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backpressure::{
    BackpressureAction, BackpressureConfig, BackpressureHandler, BackpressureStats,
};
use crate::events::{FailedRecord, StreamEvent};
use crate::metrics::MetricsTracker;
use crate::telemetry::StreamTelemetry;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Outcome of an accepted record
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    /// Identifier assigned to the buffered record
    pub record_id: Uuid,
    /// Buffer size right after the record was appended
    pub buffer_size: usize,
    /// Delay the caller should observe before submitting more records
    pub throttle: Option<Duration>,
}

struct StreamState {
    buffer: VecDeque<BufferedRecord>,
    metrics: MetricsTracker,
    last_checkpoint: Instant,
}

struct FlushTimer {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    config: StreamConfig,
    inference: Arc<dyn InferenceBackend>,
    store: Arc<dyn MetricsStore>,
    backpressure: BackpressureHandler,
    /// Never held across an await point
    state: Mutex<StreamState>,
    /// Serializes flushes
    flush_gate: AsyncMutex<()>,
    /// Serializes start and stop
    lifecycle: AsyncMutex<Option<FlushTimer>>,
    running: AtomicBool,
    events: broadcast::Sender<StreamEvent>,
    telemetry: Option<Arc<StreamTelemetry>>,
}

/// Windowed stream processor
pub struct StreamProcessor {
    inner: Arc<Inner>,
}

impl StreamProcessor {
    /// Create a processor with the default event capacity
    pub fn new(
        config: StreamConfig,
        inference: Arc<dyn InferenceBackend>,
        store: Arc<dyn MetricsStore>,
    ) -> Result<Self> {
        StreamProcessorBuilder::new(config)
            .inference(inference)
            .metrics_store(store)
            .build()
    }

    /// Create a builder
    pub fn builder(config: StreamConfig) -> StreamProcessorBuilder {
        StreamProcessorBuilder::new(config)
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.config.stream_id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Subscribe to stream events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Records currently buffered
    pub fn buffer_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn backpressure_stats(&self) -> BackpressureStats {
        self.inner.backpressure.stats()
    }

    /// Start the window timer and accept records
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let stream_id = &self.inner.config.stream_id;

        {
            let mut state = self.inner.state.lock();
            if self.inner.running.load(Ordering::SeqCst) {
                return Err(PipelineError::AlreadyRunning(stream_id.clone()));
            }
            state.last_checkpoint = Instant::now();
            self.inner.running.store(true, Ordering::SeqCst);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_flush_timer(
            Arc::downgrade(&self.inner),
            self.inner.config.window(),
            shutdown_rx,
        ));
        *lifecycle = Some(FlushTimer { handle, shutdown });

        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.increment_active_streams();
        }

        info!(
            "Stream {} started (model={}, batch_size={}, window={}ms, strategy={})",
            stream_id,
            self.inner.config.model_id,
            self.inner.config.batch_size,
            self.inner.config.window_size_ms,
            self.inner.config.backpressure_strategy.name()
        );
        self.inner.emit(StreamEvent::Started {
            stream_id: stream_id.clone(),
        });

        Ok(())
    }

    /// Stop accepting records, stop the timer and drain the buffer
    ///
    /// Stopping a stream that is not running is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let stream_id = &self.inner.config.stream_id;

        let was_running = {
            let _state = self.inner.state.lock();
            self.inner.running.swap(false, Ordering::SeqCst)
        };
        if !was_running {
            debug!("Stream {} already stopped", stream_id);
            return Ok(());
        }

        info!("Stopping stream {}", stream_id);

        if let Some(timer) = lifecycle.take() {
            let _ = timer.shutdown.send(true);
            if let Err(e) = timer.handle.await {
                if !e.is_cancelled() {
                    error!("Flush timer for stream {} panicked: {}", stream_id, e);
                }
            }
        }

        let mut drained = 0;
        loop {
            let flushed = self.inner.process_buffer().await;
            if flushed == 0 {
                break;
            }
            drained += flushed;
        }

        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.decrement_active_streams();
        }

        info!("Stream {} stopped ({} records drained)", stream_id, drained);
        self.inner.emit(StreamEvent::Stopped {
            stream_id: stream_id.clone(),
        });

        Ok(())
    }

    /// Accept one record
    ///
    /// When the buffer holds a full batch after appending, the batch is flushed
    /// before this call returns.
    pub async fn ingest(&self, data: serde_json::Value) -> Result<IngestReceipt> {
        let inner = &self.inner;
        let config = &inner.config;

        let (receipt, backpressure_event) = {
            let mut state = inner.state.lock();
            if !inner.running.load(Ordering::SeqCst) {
                return Err(PipelineError::NotRunning(config.stream_id.clone()));
            }

            let mut throttle = None;
            let mut backpressure_event = None;

            if inner.backpressure.is_engaged(state.buffer.len()) {
                let size_before = state.buffer.len();
                let action = inner.backpressure.apply(&mut state.buffer);
                state.metrics.set_backpressure_active(true);

                let event = StreamEvent::Backpressure {
                    stream_id: config.stream_id.clone(),
                    strategy: config.backpressure_strategy,
                    buffer_size: size_before,
                    utilization: inner.backpressure.utilization(size_before),
                    action,
                };

                match action {
                    BackpressureAction::Rejected { size, ceiling } => {
                        drop(state);
                        inner.record_backpressure(event);
                        return Err(PipelineError::BufferFull {
                            stream_id: config.stream_id.clone(),
                            size,
                            ceiling,
                        });
                    }
                    BackpressureAction::Throttled { delay_ms } => {
                        throttle = Some(Duration::from_millis(delay_ms));
                    }
                    BackpressureAction::Dropped { .. } | BackpressureAction::Warned { .. } => {}
                }
                backpressure_event = Some(event);
            }

            let record = BufferedRecord::new(data);
            let record_id = record.id;
            state.buffer.push_back(record);
            state.metrics.record_ingest(Instant::now());

            let receipt = IngestReceipt {
                record_id,
                buffer_size: state.buffer.len(),
                throttle,
            };
            (receipt, backpressure_event)
        };

        if let Some(event) = backpressure_event {
            inner.record_backpressure(event);
        }
        inner.backpressure.update_buffer_size(receipt.buffer_size);
        if let Some(telemetry) = &inner.telemetry {
            telemetry.record_ingest(&config.stream_id);
        }

        if receipt.buffer_size >= config.batch_size {
            inner.process_buffer().await;
        }

        Ok(receipt)
    }

    /// Snapshot of the stream's metrics
    pub fn get_metrics(&self) -> StreamMetrics {
        let mut state = self.inner.state.lock();
        let size = state.buffer.len();
        let utilization = self.inner.backpressure.utilization(size);
        state.metrics.snapshot(size, utilization)
    }

    /// Cumulative failed/total prediction ratio
    pub fn error_rate(&self) -> f64 {
        self.inner.state.lock().metrics.error_rate()
    }
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("stream_id", &self.inner.config.stream_id)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_flush_timer(inner: Weak<Inner>, window: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.process_buffer().await;
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: StreamEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record_backpressure(&self, event: StreamEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_backpressure(self.config.backpressure_strategy.name());
        }
        self.emit(event);
    }

    /// Flush up to one batch; returns the number of records removed
    async fn process_buffer(self: &Arc<Self>) -> usize {
        let _gate = self.flush_gate.lock().await;
        let config = &self.config;

        let batch: Vec<BufferedRecord> = {
            let mut state = self.state.lock();
            let count = config.batch_size.min(state.buffer.len());
            state.buffer.drain(..count).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let batch_size = batch.len();
        let parallelism = match config.parallelism {
            0 => batch_size,
            n => n,
        };
        let started = Instant::now();

        let calls: Vec<_> = batch
            .into_iter()
            .map(|record| {
                let inner = Arc::clone(self);
                async move {
                    let outcome = inner.process_single_item(&record).await;
                    (record.id, outcome)
                }
            })
            .collect();
        let outcomes: Vec<(Uuid, Result<Prediction>)> = stream::iter(calls)
            .buffered(parallelism)
            .collect()
            .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut successful = 0u64;
        let mut failed = Vec::new();
        for (record_id, outcome) in outcomes {
            match outcome {
                Ok(_) => successful += 1,
                Err(e) => failed.push(FailedRecord {
                    record_id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                }),
            }
        }

        let (remaining, checkpoint, error_rate, avg_latency_ms) = {
            let mut state = self.state.lock();
            let kinds: Vec<&str> = failed.iter().map(|f| f.kind.as_str()).collect();
            state.metrics.record_batch(successful, &kinds, latency_ms);
            let error_rate = state.metrics.error_rate();
            let avg_latency_ms = state.metrics.avg_latency_ms();

            let remaining = state.buffer.len();
            if remaining < config.batch_size {
                state.metrics.set_backpressure_active(false);
            }

            let checkpoint = if state.last_checkpoint.elapsed() >= config.checkpoint_interval() {
                state.last_checkpoint = Instant::now();
                let utilization = self.backpressure.utilization(remaining);
                Some(state.metrics.snapshot(remaining, utilization))
            } else {
                None
            };
            (remaining, checkpoint, error_rate, avg_latency_ms)
        };

        self.backpressure.update_buffer_size(remaining);
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_flush(
                &config.stream_id,
                batch_size,
                latency_ms,
                successful,
                failed.len() as u64,
            );
        }

        debug!(
            "Stream {} flushed {} records ({} ok, {} failed) in {:.1}ms",
            config.stream_id,
            batch_size,
            successful,
            failed.len(),
            latency_ms
        );

        self.emit(StreamEvent::BatchProcessed {
            stream_id: config.stream_id.clone(),
            batch_size,
            successful,
            failed: failed.len() as u64,
            latency_ms,
            error_rate,
            avg_latency_ms,
            timestamp: Utc::now(),
        });

        if !failed.is_empty() {
            warn!(
                "Stream {}: {} of {} records failed inference",
                config.stream_id,
                failed.len(),
                batch_size
            );
            self.emit(StreamEvent::FailedItems {
                stream_id: config.stream_id.clone(),
                items: failed,
            });
        }

        if let Some(metrics) = checkpoint {
            self.spawn_checkpoint(metrics);
        }

        batch_size
    }

    async fn process_single_item(&self, record: &BufferedRecord) -> Result<Prediction> {
        let stream_id = &self.config.stream_id;

        let outcome = match serde_json::to_string(&record.data) {
            Ok(input) => self.inference.predict(&self.config.model_id, &input).await,
            Err(e) => Err(PipelineError::from(e)),
        };

        match outcome {
            Ok(prediction) => {
                let latency_ms = (Utc::now() - record.timestamp)
                    .num_microseconds()
                    .map(|us| us as f64 / 1000.0)
                    .unwrap_or(f64::MAX);
                self.emit(StreamEvent::Prediction {
                    stream_id: stream_id.clone(),
                    record_id: record.id,
                    prediction: prediction.clone(),
                    latency_ms,
                });
                Ok(prediction)
            }
            Err(e) => {
                debug!("Prediction failed for record {} on {}: {}", record.id, stream_id, e);
                self.emit(StreamEvent::PredictionError {
                    stream_id: stream_id.clone(),
                    record_id: record.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Persist a snapshot without blocking the flush; failures are reported, not raised
    fn spawn_checkpoint(&self, metrics: StreamMetrics) {
        let store = self.store.clone();
        let events = self.events.clone();
        let telemetry = self.telemetry.clone();
        let stream_id = self.config.stream_id.clone();
        let model_id = self.config.model_id.clone();

        tokio::spawn(async move {
            let outcome = store
                .save_metrics_snapshot(&stream_id, &model_id, &metrics)
                .await;
            if let Some(telemetry) = &telemetry {
                telemetry.record_checkpoint(outcome.is_ok());
            }

            match outcome {
                Ok(()) => {
                    debug!("Checkpoint saved for stream {}", stream_id);
                    let _ = events.send(StreamEvent::Checkpoint {
                        stream_id,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    warn!("Checkpoint failed for stream {}: {}", stream_id, e);
                    let _ = events.send(StreamEvent::Error {
                        stream_id,
                        kind: e.kind().to_string(),
                        message: format!("checkpoint failed: {}", e),
                    });
                }
            }
        });
    }
}

/// Builder for [`StreamProcessor`]
pub struct StreamProcessorBuilder {
    config: StreamConfig,
    inference: Option<Arc<dyn InferenceBackend>>,
    store: Option<Arc<dyn MetricsStore>>,
    telemetry: Option<Arc<StreamTelemetry>>,
    event_capacity: usize,
}

impl StreamProcessorBuilder {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            inference: None,
            store: None,
            telemetry: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn inference(mut self, inference: Arc<dyn InferenceBackend>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn metrics_store(mut self, store: Arc<dyn MetricsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<StreamTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<StreamProcessor> {
        self.config.validate()?;
        if self.event_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        let inference = self.inference.ok_or_else(|| {
            PipelineError::InvalidConfig("stream processor requires an inference backend".to_string())
        })?;
        let store = self.store.ok_or_else(|| {
            PipelineError::InvalidConfig("stream processor requires a metrics store".to_string())
        })?;

        let (events, _) = broadcast::channel(self.event_capacity);
        let backpressure = BackpressureHandler::new(BackpressureConfig::from(&self.config));
        let metrics = MetricsTracker::new(self.config.stream_id.clone());

        Ok(StreamProcessor {
            inner: Arc::new(Inner {
                config: self.config,
                inference,
                store,
                backpressure,
                state: Mutex::new(StreamState {
                    buffer: VecDeque::new(),
                    metrics,
                    last_checkpoint: Instant::now(),
                }),
                flush_gate: AsyncMutex::new(()),
                lifecycle: AsyncMutex::new(None),
                running: AtomicBool::new(false),
                events,
                telemetry: self.telemetry,
            }),
        })
    }
}
