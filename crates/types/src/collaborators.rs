//! Collaborator traits
//!
//! The engines never perform inference, storage or notification delivery
//! themselves; they call out through these traits. Implementations must be
//! safe to call concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, AlertActionType};
use crate::errors::Result;
use crate::stream::StreamMetrics;

/// Result of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Model that produced the output
    pub model_id: String,
    /// Opaque model output
    pub output: serde_json::Value,
    /// Optional confidence score
    #[serde(default)]
    pub confidence: Option<f64>,
    /// When the backend produced the prediction
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    pub fn new(model_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            model_id: model_id.into(),
            output,
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Inference backend executing a model on serialized input
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run the model on one serialized record
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction>;
}

/// Durable store for metric checkpoints and alert audit records
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist a periodic snapshot of a stream's metrics
    async fn save_metrics_snapshot(
        &self,
        stream_id: &str,
        model_id: &str,
        metrics: &StreamMetrics,
    ) -> Result<()>;

    /// Persist a fired alert to the audit trail
    async fn save_audit_record(&self, alert: &Alert) -> Result<()>;
}

/// Notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert through the given transport
    async fn dispatch(
        &self,
        action_type: AlertActionType,
        config: &serde_json::Value,
        alert: &Alert,
    ) -> Result<()>;
}
