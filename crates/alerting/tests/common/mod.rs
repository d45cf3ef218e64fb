//! Common test utilities for alert engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use realtime_pipeline_types::{
    Alert, AlertAction, AlertActionType, AlertRule, AlertSeverity, ComparisonOperator,
    MetricsStore, Notifier, PipelineError, Result, StreamMetrics,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;

/// Notifier recording deliveries; transports in `failing` always error
#[derive(Default)]
pub struct RecordingNotifier {
    failing: HashSet<AlertActionType>,
    delivered: Mutex<Vec<(AlertActionType, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(action_type: AlertActionType) -> Self {
        Self {
            failing: HashSet::from([action_type]),
            ..Self::default()
        }
    }

    /// (transport, rule id) per attempted delivery
    pub fn delivered(&self) -> Vec<(AlertActionType, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(
        &self,
        action_type: AlertActionType,
        _config: &serde_json::Value,
        alert: &Alert,
    ) -> Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((action_type, alert.rule_id.clone()));
        if self.failing.contains(&action_type) {
            return Err(PipelineError::Notification(format!(
                "{} endpoint unreachable",
                action_type.name()
            )));
        }
        Ok(())
    }
}

/// Audit store that can be made to fail
#[derive(Default)]
pub struct AuditStore {
    fail: bool,
    audits: Mutex<Vec<Alert>>,
}

impl AuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn audits(&self) -> Vec<Alert> {
        self.audits.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsStore for AuditStore {
    async fn save_metrics_snapshot(
        &self,
        _stream_id: &str,
        _model_id: &str,
        _metrics: &StreamMetrics,
    ) -> Result<()> {
        Ok(())
    }

    async fn save_audit_record(&self, alert: &Alert) -> Result<()> {
        if self.fail {
            return Err(PipelineError::Persistence("audit table locked".to_string()));
        }
        self.audits.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// `error_rate > threshold` rule with a webhook action
pub fn error_rate_rule(id: &str, threshold: f64) -> AlertRule {
    AlertRule::new(
        id,
        format!("Error rate above {}", threshold),
        "error_rate",
        ComparisonOperator::Gt,
        threshold,
        AlertSeverity::High,
    )
    .with_action(AlertAction::new(
        AlertActionType::Webhook,
        json!({ "url": "http://localhost:9000/alerts" }),
    ))
}
