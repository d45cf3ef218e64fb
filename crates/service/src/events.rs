//! Outward event surface of the service

use alerting::AlertEvent;
use batch::BatchEvent;
use serde::Serialize;
use streaming::StreamEvent;

/// Events re-published by the service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServiceEvent {
    StreamCreated { stream_id: String, model_id: String },
    StreamStarted { stream_id: String },
    StreamStopped { stream_id: String },
    StreamRemoved { stream_id: String },
    /// Data-plane event of one stream
    Stream(StreamEvent),
    Batch(BatchEvent),
    Alert(AlertEvent),
}

impl ServiceEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamCreated { .. } => "stream_created",
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamStopped { .. } => "stream_stopped",
            Self::StreamRemoved { .. } => "stream_removed",
            Self::Stream(event) => match event {
                StreamEvent::BatchProcessed { .. } => "stream_batch_processed",
                StreamEvent::Error { .. } => "stream_error",
                other => other.name(),
            },
            Self::Batch(event) => match event {
                BatchEvent::JobStarted { .. } => "batch_job_started",
                BatchEvent::JobProgress { .. } => "batch_job_progress",
                BatchEvent::JobCompleted { .. } => "batch_job_completed",
                BatchEvent::JobFailed { .. } => "batch_job_failed",
                BatchEvent::JobCancelled { .. } => "batch_job_cancelled",
            },
            Self::Alert(event) => event.name(),
        }
    }

    /// Stream the event belongs to, if any
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::StreamCreated { stream_id, .. }
            | Self::StreamStarted { stream_id }
            | Self::StreamStopped { stream_id }
            | Self::StreamRemoved { stream_id } => Some(stream_id),
            Self::Stream(event) => Some(event.stream_id()),
            Self::Batch(_) | Self::Alert(_) => None,
        }
    }
}
