//! Core types and data models for the real-time inference pipeline
//!
//! This crate provides the data structures shared by the stream, batch and
//! alerting engines, the error taxonomy, and the traits through which the
//! engines reach their external collaborators (inference backend, metrics
//! store, notification transports).

pub mod alerts;
pub mod batch;
pub mod collaborators;
pub mod errors;
pub mod stream;

pub use alerts::{
    Alert, AlertAction, AlertActionType, AlertCondition, AlertRule, AlertRuleUpdate,
    AlertSeverity, ComparisonOperator, MetricSample,
};
pub use batch::{
    BackoffStrategy, BatchJob, BatchJobStatus, JobPerformance, JobProgress,
    RetryPolicy,
};
pub use collaborators::{InferenceBackend, MetricsStore, Notifier, Prediction};
pub use errors::{PipelineError, Result};
pub use stream::{
    BackpressureState, BackpressureStrategy, BufferedRecord, ErrorMetrics, LatencyMetrics,
    PredictionCounters, StreamConfig, StreamMetrics,
};
