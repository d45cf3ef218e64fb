//! Stream processor events

use chrono::{DateTime, Utc};
use realtime_pipeline_types::{BackpressureStrategy, Prediction};
use serde::Serialize;
use uuid::Uuid;

use crate::backpressure::BackpressureAction;

/// A record whose inference call failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    pub record_id: Uuid,
    /// Error kind, as counted in the error metrics
    pub kind: String,
    pub error: String,
}

/// Events published by a stream processor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started {
        stream_id: String,
    },
    Stopped {
        stream_id: String,
    },
    /// Buffer reached the backpressure threshold
    Backpressure {
        stream_id: String,
        strategy: BackpressureStrategy,
        buffer_size: usize,
        utilization: f64,
        action: BackpressureAction,
    },
    BatchProcessed {
        stream_id: String,
        batch_size: usize,
        successful: u64,
        failed: u64,
        latency_ms: f64,
        /// Cumulative failed/total prediction ratio after this flush
        error_rate: f64,
        /// Smoothed flush latency after this flush
        avg_latency_ms: f64,
        timestamp: DateTime<Utc>,
    },
    /// Records from one flush whose inference failed
    FailedItems {
        stream_id: String,
        items: Vec<FailedRecord>,
    },
    Prediction {
        stream_id: String,
        record_id: Uuid,
        prediction: Prediction,
        /// Milliseconds from ingestion to prediction
        latency_ms: f64,
    },
    PredictionError {
        stream_id: String,
        record_id: Uuid,
        error: String,
    },
    Checkpoint {
        stream_id: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        stream_id: String,
        kind: String,
        message: String,
    },
}

impl StreamEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
            Self::Backpressure { .. } => "backpressure",
            Self::BatchProcessed { .. } => "batch_processed",
            Self::FailedItems { .. } => "failed_items",
            Self::Prediction { .. } => "prediction",
            Self::PredictionError { .. } => "prediction_error",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Error { .. } => "error",
        }
    }

    /// Stream that published the event
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Started { stream_id }
            | Self::Stopped { stream_id }
            | Self::Backpressure { stream_id, .. }
            | Self::BatchProcessed { stream_id, .. }
            | Self::FailedItems { stream_id, .. }
            | Self::Prediction { stream_id, .. }
            | Self::PredictionError { stream_id, .. }
            | Self::Checkpoint { stream_id, .. }
            | Self::Error { stream_id, .. } => stream_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = StreamEvent::Checkpoint {
            stream_id: "orders".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "checkpoint");
        assert_eq!(json["stream_id"], "orders");
        assert_eq!(event.name(), "checkpoint");
        assert_eq!(event.stream_id(), "orders");
    }

    #[test]
    fn test_backpressure_event_carries_action() {
        let event = StreamEvent::Backpressure {
            stream_id: "orders".to_string(),
            strategy: BackpressureStrategy::Drop,
            buffer_size: 20,
            utilization: 100.0,
            action: BackpressureAction::Dropped { count: 2 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["strategy"], "drop");
        assert_eq!(json["action"]["action"], "dropped");
        assert_eq!(json["action"]["count"], 2);
    }
}
