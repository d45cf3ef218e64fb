//! Real-Time Processing Service

use alerting::{AlertEngine, AlertEngineConfig};
use batch::{BatchJobConfig, BatchProcessor, BatchProcessorConfig, BatchSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use realtime_pipeline_config::{PipelineConfig, AVG_LATENCY_METRIC, ERROR_RATE_METRIC};
use realtime_pipeline_types::{
    Alert, AlertRule, AlertRuleUpdate, BatchJob, InferenceBackend, MetricsStore, Notifier,
    PipelineError, Result, StreamConfig, StreamMetrics,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streaming::{IngestReceipt, StreamEvent, StreamProcessor, StreamTelemetry};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::ServiceEvent;

/// How long cleanup waits for a stream forwarder to drain its channel
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Orchestrator for streams, batch jobs and alert rules
pub struct RealTimeProcessingService {
    config: PipelineConfig,
    inference: Arc<dyn InferenceBackend>,
    store: Arc<dyn MetricsStore>,
    telemetry: Option<Arc<StreamTelemetry>>,
    streams: DashMap<String, Arc<StreamProcessor>>,
    stream_forwarders: DashMap<String, JoinHandle<()>>,
    batch: BatchProcessor,
    alerts: Arc<AlertEngine>,
    /// Batch and alert forwarders
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
    events: broadcast::Sender<ServiceEvent>,
}

impl RealTimeProcessingService {
    /// Create a service from validated configuration
    pub fn new(
        config: PipelineConfig,
        inference: Arc<dyn InferenceBackend>,
        store: Arc<dyn MetricsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        let capacity = config.service.event_channel_capacity;
        let batch = BatchProcessor::with_config(
            inference.clone(),
            BatchProcessorConfig {
                slice_yield: Duration::from_millis(config.batch.slice_yield_ms),
                event_capacity: capacity,
            },
        );
        let alerts = Arc::new(AlertEngine::with_config(
            notifier,
            store.clone(),
            AlertEngineConfig {
                history_retention: Duration::from_secs(config.alerting.history_retention_secs),
                recent_alerts_capacity: config.alerting.recent_alerts_capacity,
                event_capacity: capacity,
            },
        ));
        let (events, _) = broadcast::channel(capacity);

        Ok(Self {
            config,
            inference,
            store,
            telemetry: None,
            streams: DashMap::new(),
            stream_forwarders: DashMap::new(),
            batch,
            alerts,
            forwarders: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            events,
        })
    }

    /// Record stream telemetry for streams created from now on
    pub fn with_telemetry(mut self, telemetry: Arc<StreamTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Subscribe to the combined event surface
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn alert_engine(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn batch_processor(&self) -> &BatchProcessor {
        &self.batch
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }

    /// Start event forwarding and register the configured default rules
    ///
    /// Calling this on an initialized service does nothing.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Service already initialized");
            return Ok(());
        }

        info!("Initializing {}", self.config.service.name);

        {
            let mut forwarders = self.forwarders.lock();
            forwarders.push(spawn_forwarder(
                "batch",
                self.batch.subscribe(),
                self.events.clone(),
                ServiceEvent::Batch,
            ));
            forwarders.push(spawn_forwarder(
                "alert",
                self.alerts.subscribe(),
                self.events.clone(),
                ServiceEvent::Alert,
            ));
        }

        for rule in &self.config.alerting.default_rules {
            if let Err(e) = self.alerts.add_rule(rule.clone()) {
                self.stop_forwarders();
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        info!(
            "Service initialized with {} default alert rules",
            self.config.alerting.default_rules.len()
        );
        Ok(())
    }

    // Streams

    /// Register a stream; it accepts records once started
    pub async fn create_stream(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let stream_id = config.stream_id.clone();
        let model_id = config.model_id.clone();

        match self.streams.entry(stream_id.clone()) {
            Entry::Occupied(_) => return Err(PipelineError::already_exists("stream", stream_id)),
            Entry::Vacant(entry) => {
                let mut builder = StreamProcessor::builder(config)
                    .inference(self.inference.clone())
                    .metrics_store(self.store.clone())
                    .event_capacity(self.config.service.event_channel_capacity);
                if let Some(telemetry) = &self.telemetry {
                    builder = builder.telemetry(telemetry.clone());
                }
                let processor = Arc::new(builder.build()?);

                let forwarder = spawn_stream_forwarder(
                    processor.subscribe(),
                    self.alerts.clone(),
                    self.events.clone(),
                );
                entry.insert(processor);
                if let Some(previous) = self.stream_forwarders.insert(stream_id.clone(), forwarder)
                {
                    previous.abort();
                }
            }
        }

        info!("Stream {} created (model={})", stream_id, model_id);
        self.emit(ServiceEvent::StreamCreated {
            stream_id,
            model_id,
        });
        Ok(())
    }

    /// Register a stream built from the configured stream defaults
    pub async fn create_stream_with_defaults(
        &self,
        stream_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<()> {
        let config = self
            .config
            .stream_defaults
            .stream_config(stream_id, model_id);
        self.create_stream(config).await
    }

    fn stream(&self, stream_id: &str) -> Result<Arc<StreamProcessor>> {
        self.streams
            .get(stream_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PipelineError::not_found("stream", stream_id))
    }

    pub async fn start_stream(&self, stream_id: &str) -> Result<()> {
        self.stream(stream_id)?.start().await
    }

    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        self.stream(stream_id)?.stop().await
    }

    /// Submit one record to a running stream
    pub async fn ingest_data(
        &self,
        stream_id: &str,
        data: serde_json::Value,
    ) -> Result<IngestReceipt> {
        self.stream(stream_id)?.ingest(data).await
    }

    pub fn get_stream_metrics(&self, stream_id: &str) -> Result<StreamMetrics> {
        Ok(self.stream(stream_id)?.get_metrics())
    }

    /// Registered stream ids, sorted
    pub fn list_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop a stream and drop it from the registry
    pub async fn remove_stream(&self, stream_id: &str) -> Result<()> {
        let processor = self.stream(stream_id)?;
        processor.stop().await?;

        self.streams.remove(stream_id);
        // The forwarder exits on its own once the processor's channel closes
        self.stream_forwarders.remove(stream_id);

        info!("Stream {} removed", stream_id);
        self.emit(ServiceEvent::StreamRemoved {
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    // Batch jobs

    pub fn submit_batch_job(&self, config: BatchJobConfig) -> Result<String> {
        self.batch.submit_job(config)
    }

    /// Job configuration using the configured default slice size
    pub fn new_batch_job(
        &self,
        model_id: impl Into<String>,
        source: Arc<dyn BatchSource>,
    ) -> BatchJobConfig {
        BatchJobConfig::new(model_id, source).with_batch_size(self.config.batch.default_batch_size)
    }

    pub fn get_batch_job(&self, job_id: &str) -> Option<BatchJob> {
        self.batch.get_job(job_id)
    }

    pub fn list_batch_jobs(&self) -> Vec<BatchJob> {
        self.batch.list_jobs()
    }

    pub fn cancel_batch_job(&self, job_id: &str) -> Result<bool> {
        self.batch.cancel_job(job_id)
    }

    // Alerting

    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        self.alerts.add_rule(rule)
    }

    pub fn remove_alert_rule(&self, rule_id: &str) -> bool {
        self.alerts.remove_rule(rule_id)
    }

    pub fn update_alert_rule(&self, rule_id: &str, update: AlertRuleUpdate) -> Result<AlertRule> {
        self.alerts.update_rule(rule_id, update)
    }

    pub fn get_alert_rules(&self) -> Vec<AlertRule> {
        self.alerts.get_rules()
    }

    /// Evaluate a metric value against the alert rules
    pub async fn check_metric(&self, metric: &str, value: f64) -> Vec<Alert> {
        self.alerts.check_metric(metric, value).await
    }

    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts.recent_alerts()
    }

    /// Stop every stream, clear the registry and stop event forwarding
    ///
    /// Stream forwarders are given time to publish the events emitted while
    /// their streams stopped before they are aborted.
    pub async fn cleanup(&self) {
        info!("Cleaning up {} streams", self.streams.len());

        let processors: Vec<Arc<StreamProcessor>> =
            self.streams.iter().map(|e| e.value().clone()).collect();
        for processor in &processors {
            if let Err(e) = processor.stop().await {
                warn!("Failed to stop stream {}: {}", processor.stream_id(), e);
            }
        }
        self.streams.clear();
        // Last references gone, so each stream channel closes
        drop(processors);

        let stream_ids: Vec<String> = self
            .stream_forwarders
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for stream_id in stream_ids {
            let Some((_, mut handle)) = self.stream_forwarders.remove(&stream_id) else {
                continue;
            };
            if tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!("Stream {} event forwarder did not drain in time", stream_id);
                handle.abort();
            }
        }
        self.stop_forwarders();

        self.initialized.store(false, Ordering::SeqCst);
        info!("Service cleanup complete");
    }

    fn stop_forwarders(&self) {
        for handle in self.forwarders.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for RealTimeProcessingService {
    fn drop(&mut self) {
        for entry in self.stream_forwarders.iter() {
            entry.value().abort();
        }
        self.stop_forwarders();
    }
}

impl std::fmt::Debug for RealTimeProcessingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimeProcessingService")
            .field("name", &self.config.service.name)
            .field("streams", &self.list_streams())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn spawn_forwarder<E, F>(
    source: &'static str,
    mut rx: broadcast::Receiver<E>,
    events: broadcast::Sender<ServiceEvent>,
    wrap: F,
) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: Fn(E) -> ServiceEvent + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let _ = events.send(wrap(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} event forwarder lagged, {} events skipped", source, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("{} event forwarder finished", source);
    })
}

/// Re-publish one stream's events and feed its metrics into the alert engine
fn spawn_stream_forwarder(
    mut rx: broadcast::Receiver<StreamEvent>,
    alerts: Arc<AlertEngine>,
    events: broadcast::Sender<ServiceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Stream event forwarder lagged, {} events skipped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                StreamEvent::Started { stream_id } => {
                    let _ = events.send(ServiceEvent::StreamStarted { stream_id });
                }
                StreamEvent::Stopped { stream_id } => {
                    let _ = events.send(ServiceEvent::StreamStopped { stream_id });
                }
                StreamEvent::BatchProcessed {
                    error_rate,
                    avg_latency_ms,
                    ..
                } => {
                    let _ = events.send(ServiceEvent::Stream(event));
                    alerts.check_metric(ERROR_RATE_METRIC, error_rate).await;
                    alerts.check_metric(AVG_LATENCY_METRIC, avg_latency_ms).await;
                }
                event => {
                    let _ = events.send(ServiceEvent::Stream(event));
                }
            }
        }
        debug!("Stream event forwarder finished");
    })
}
