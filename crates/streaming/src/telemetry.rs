//! OpenTelemetry Integration
//!
//! Stream processor instruments: ingestion, flush batches, predictions,
//! backpressure actions and checkpoints.

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use thiserror::Error;

/// Telemetry error types
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics export error: {0}")]
    ExportError(String),

    #[error(transparent)]
    OpenTelemetryError(#[from] opentelemetry::metrics::MetricsError),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Stream telemetry instruments
pub struct StreamTelemetry {
    records_ingested: Counter<u64>,
    predictions: Counter<u64>,
    flush_latency: Histogram<f64>,
    batch_size: Histogram<u64>,
    backpressure_actions: Counter<u64>,
    checkpoints: Counter<u64>,
    active_streams: UpDownCounter<i64>,
}

impl StreamTelemetry {
    /// Create instruments on the given meter
    pub fn new(meter: Meter) -> Result<Self> {
        let records_ingested = meter
            .u64_counter("stream_records_ingested_total")
            .with_description("Total number of records accepted into stream buffers")
            .with_unit("records")
            .init();

        let predictions = meter
            .u64_counter("stream_predictions_total")
            .with_description("Total number of inference calls by outcome")
            .with_unit("predictions")
            .init();

        let flush_latency = meter
            .f64_histogram("stream_flush_duration_ms")
            .with_description("Time taken to flush one batch through inference")
            .with_unit("ms")
            .init();

        let batch_size = meter
            .u64_histogram("stream_batch_size")
            .with_description("Number of records in each flushed batch")
            .with_unit("records")
            .init();

        let backpressure_actions = meter
            .u64_counter("stream_backpressure_actions_total")
            .with_description("Total number of backpressure actions by strategy")
            .init();

        let checkpoints = meter
            .u64_counter("stream_checkpoints_total")
            .with_description("Total number of metrics checkpoints by outcome")
            .init();

        let active_streams = meter
            .i64_up_down_counter("active_streams")
            .with_description("Number of running stream processors")
            .init();

        Ok(Self {
            records_ingested,
            predictions,
            flush_latency,
            batch_size,
            backpressure_actions,
            checkpoints,
            active_streams,
        })
    }

    /// Record an accepted record
    pub fn record_ingest(&self, stream_id: &str) {
        self.records_ingested
            .add(1, &[KeyValue::new("stream_id", stream_id.to_string())]);
    }

    /// Record a completed flush
    pub fn record_flush(
        &self,
        stream_id: &str,
        batch_size: usize,
        latency_ms: f64,
        successful: u64,
        failed: u64,
    ) {
        let stream = KeyValue::new("stream_id", stream_id.to_string());
        self.batch_size.record(batch_size as u64, &[stream.clone()]);
        self.flush_latency.record(latency_ms, &[stream.clone()]);
        self.predictions.add(
            successful,
            &[stream.clone(), KeyValue::new("outcome", "success")],
        );
        self.predictions
            .add(failed, &[stream, KeyValue::new("outcome", "failure")]);
    }

    /// Record a backpressure action
    pub fn record_backpressure(&self, strategy: &'static str) {
        self.backpressure_actions
            .add(1, &[KeyValue::new("strategy", strategy)]);
    }

    /// Record a checkpoint attempt
    pub fn record_checkpoint(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.checkpoints.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    /// Increment running streams
    pub fn increment_active_streams(&self) {
        self.active_streams.add(1, &[]);
    }

    /// Decrement running streams
    pub fn decrement_active_streams(&self) {
        self.active_streams.add(-1, &[]);
    }
}

/// Telemetry provider configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "realtime-pipeline".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Telemetry provider
pub struct TelemetryProvider {
    meter_provider: SdkMeterProvider,
    metrics: Arc<StreamTelemetry>,
}

impl TelemetryProvider {
    /// Initialize telemetry provider
    pub fn init(config: TelemetryConfig) -> Result<Self> {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", config.service_version.clone()),
        ]);

        // No exporter is attached; instruments aggregate in-process.
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .build();

        let meter = meter_provider.meter("stream_processor");
        let metrics = Arc::new(StreamTelemetry::new(meter)?);

        Ok(Self {
            meter_provider,
            metrics,
        })
    }

    /// Get stream instruments
    pub fn metrics(&self) -> Arc<StreamTelemetry> {
        self.metrics.clone()
    }

    /// Shutdown telemetry
    pub fn shutdown(self) -> Result<()> {
        self.meter_provider
            .shutdown()
            .map_err(|e| TelemetryError::ExportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "realtime-pipeline");
    }

    #[test]
    fn test_record_stream_metrics() {
        let provider = TelemetryProvider::init(TelemetryConfig::default()).unwrap();
        let metrics = provider.metrics();

        metrics.increment_active_streams();
        metrics.record_ingest("orders");
        metrics.record_flush("orders", 10, 42.5, 9, 1);
        metrics.record_backpressure("drop");
        metrics.record_checkpoint(false);
        metrics.decrement_active_streams();

        provider.shutdown().unwrap();
    }
}
