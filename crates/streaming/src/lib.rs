//! Stream Processing
//!
//! Windowed stream processor: records are buffered per stream and flushed
//! through an inference backend in bounded batches, with backpressure,
//! periodic metric checkpoints and an event channel for observers.

pub mod backpressure;
pub mod events;
pub mod metrics;
pub mod processor;
pub mod telemetry;

pub use backpressure::{
    BackpressureAction, BackpressureConfig, BackpressureHandler, BackpressureStats, BufferLevel,
};
pub use events::{FailedRecord, StreamEvent};
pub use metrics::{MetricsTracker, THROUGHPUT_WINDOW};
pub use processor::{IngestReceipt, StreamProcessor, StreamProcessorBuilder, DEFAULT_EVENT_CAPACITY};
pub use telemetry::{StreamTelemetry, TelemetryConfig, TelemetryError, TelemetryProvider};
