//! Alert notifiers

use async_trait::async_trait;
use realtime_pipeline_config::NotificationSettings;
use realtime_pipeline_types::{
    Alert, AlertActionType, AlertSeverity, Notifier, PipelineError, Result,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::USER_AGENT;

const SOURCE: &str = "realtime-pipeline";

/// Notifier delivering alerts over HTTP
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    pagerduty_url: String,
    email_relay_url: Option<String>,
}

impl HttpNotifier {
    /// Create a new notifier
    pub fn new(settings: &NotificationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            pagerduty_url: settings.pagerduty_url.clone(),
            email_relay_url: settings.email_relay_url.clone(),
        })
    }

    /// Target URL and JSON body for one delivery
    pub fn build_request(
        &self,
        action_type: AlertActionType,
        config: &Value,
        alert: &Alert,
    ) -> Result<(String, Value)> {
        match action_type {
            AlertActionType::Webhook => {
                let url = required_str(config, "url", action_type)?;
                Ok((url, json!({ "event": "alert_triggered", "source": SOURCE, "alert": alert })))
            }
            AlertActionType::Slack => {
                let url = required_str(config, "url", action_type)?;
                let mut body = json!({ "text": summary(alert) });
                if let Some(channel) = config.get("channel").and_then(Value::as_str) {
                    body["channel"] = json!(channel);
                }
                Ok((url, body))
            }
            AlertActionType::Pagerduty => {
                let url = optional_str(config, "url").unwrap_or_else(|| self.pagerduty_url.clone());
                let routing_key = required_str(config, "routing_key", action_type)?;
                let body = json!({
                    "routing_key": routing_key,
                    "event_action": "trigger",
                    "dedup_key": alert.rule_id,
                    "payload": {
                        "summary": summary(alert),
                        "source": SOURCE,
                        "severity": pagerduty_severity(alert.severity),
                        "timestamp": alert.timestamp.to_rfc3339(),
                        "custom_details": {
                            "metric": alert.metric,
                            "value": alert.value,
                            "threshold": alert.threshold,
                        },
                    },
                });
                Ok((url, body))
            }
            AlertActionType::Email => {
                let url = optional_str(config, "relay_url")
                    .or_else(|| self.email_relay_url.clone())
                    .ok_or_else(|| {
                        PipelineError::Notification("no email relay configured".to_string())
                    })?;
                let to = required_str(config, "to", action_type)?;
                let body = json!({
                    "to": to,
                    "subject": format!("[{}] {}", alert.severity.name().to_uppercase(), alert.rule_name),
                    "body": alert.description,
                });
                Ok((url, body))
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn dispatch(&self, action_type: AlertActionType, config: &Value, alert: &Alert) -> Result<()> {
        let (url, body) = self.build_request(action_type, config, alert)?;

        debug!("Delivering alert {} via {} to {}", alert.id, action_type.name(), url);

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            PipelineError::Notification(format!("{} delivery to {} failed: {}", action_type.name(), url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("{} endpoint returned {}: {}", action_type.name(), status, error_text);
            return Err(PipelineError::Notification(format!(
                "{} endpoint returned {}",
                action_type.name(),
                status
            )));
        }

        info!("Alert {} delivered via {}", alert.id, action_type.name());
        Ok(())
    }
}

/// Notifier that only writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, action_type: AlertActionType, _config: &Value, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => {
                warn!(action = action_type.name(), rule = %alert.rule_id, "{}", summary(alert))
            }
            AlertSeverity::Medium | AlertSeverity::Low => {
                info!(action = action_type.name(), rule = %alert.rule_id, "{}", summary(alert))
            }
        }
        Ok(())
    }
}

fn summary(alert: &Alert) -> String {
    format!(
        "[{}] {}: {}",
        alert.severity.name().to_uppercase(),
        alert.rule_name,
        alert.description
    )
}

fn pagerduty_severity(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Critical => "critical",
        AlertSeverity::High => "error",
        AlertSeverity::Medium => "warning",
        AlertSeverity::Low => "info",
    }
}

fn optional_str(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_str(config: &Value, key: &str, action_type: AlertActionType) -> Result<String> {
    optional_str(config, key).ok_or_else(|| {
        PipelineError::Notification(format!("{} action requires '{}'", action_type.name(), key))
    })
}
