//! Alert engine events

use realtime_pipeline_types::{Alert, AlertActionType};
use serde::Serialize;
use uuid::Uuid;

/// Events published by the alert engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    RuleAdded {
        rule_id: String,
    },
    RuleRemoved {
        rule_id: String,
    },
    RuleUpdated {
        rule_id: String,
    },
    AlertTriggered {
        alert: Alert,
    },
    /// A notification action of a fired alert could not be delivered
    ActionFailed {
        rule_id: String,
        alert_id: Uuid,
        action_type: AlertActionType,
        error: String,
    },
}

impl AlertEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::RuleAdded { .. } => "rule_added",
            Self::RuleRemoved { .. } => "rule_removed",
            Self::RuleUpdated { .. } => "rule_updated",
            Self::AlertTriggered { .. } => "alert_triggered",
            Self::ActionFailed { .. } => "action_failed",
        }
    }
}
