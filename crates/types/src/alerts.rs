//! Alert rules, alert records and metric samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Get severity name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Comparison applied between a metric value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    Gt,
    Lt,
    Eq,
    Ne,
    Gte,
    Lte,
}

impl ComparisonOperator {
    /// Evaluate `value <op> threshold`
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
            Self::Ne => (value - threshold).abs() >= f64::EPSILON,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
        }
    }

    /// Operator symbol for messages
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// Condition of an alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// Metric name the rule watches
    pub metric: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    /// Evaluation window in milliseconds
    pub time_window_ms: u64,
}

/// Notification transport of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertActionType {
    Email,
    Webhook,
    Slack,
    Pagerduty,
}

impl AlertActionType {
    /// Get action type name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Slack => "slack",
            Self::Pagerduty => "pagerduty",
        }
    }
}

/// Action executed when a rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    #[serde(rename = "type")]
    pub action_type: AlertActionType,
    /// Transport-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl AlertAction {
    pub fn new(action_type: AlertActionType, config: serde_json::Value) -> Self {
        Self {
            action_type,
            config,
        }
    }
}

/// Threshold alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    /// Cooldown in milliseconds (0 disables suppression)
    #[serde(default)]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Create an enabled rule without actions or cooldown
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            condition: AlertCondition {
                metric: metric.into(),
                operator,
                threshold,
                time_window_ms: 5 * 60 * 1_000,
            },
            severity,
            actions: Vec::new(),
            cooldown_ms: 0,
            last_triggered: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_time_window_ms(mut self, time_window_ms: u64) -> Self {
        self.condition.time_window_ms = time_window_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Cooldown as a duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Whether `value` satisfies the rule condition
    pub fn matches(&self, value: f64) -> bool {
        self.condition
            .operator
            .evaluate(value, self.condition.threshold)
    }
}

/// Partial update of an alert rule; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub condition: Option<AlertCondition>,
    pub severity: Option<AlertSeverity>,
    pub actions: Option<Vec<AlertAction>>,
    pub cooldown_ms: Option<u64>,
}

impl AlertRuleUpdate {
    /// Apply the patch to a rule
    pub fn apply_to(self, rule: &mut AlertRule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(condition) = self.condition {
            rule.condition = condition;
        }
        if let Some(severity) = self.severity {
            rule.severity = severity;
        }
        if let Some(actions) = self.actions {
            rule.actions = actions;
        }
        if let Some(cooldown_ms) = self.cooldown_ms {
            rule.cooldown_ms = cooldown_ms;
        }
    }
}

/// A fired alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl Alert {
    /// Build the alert record for a rule firing on `value`
    pub fn from_rule(rule: &AlertRule, value: f64) -> Self {
        let description = if rule.description.is_empty() {
            format!(
                "{} {} {} (observed {})",
                rule.condition.metric,
                rule.condition.operator.symbol(),
                rule.condition.threshold,
                value
            )
        } else {
            rule.description.clone()
        };

        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            metric: rule.condition.metric.clone(),
            value,
            threshold: rule.condition.threshold,
            timestamp: Utc::now(),
            description,
        }
    }
}

/// One observed metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        assert!(ComparisonOperator::Gt.evaluate(20.0, 15.0));
        assert!(!ComparisonOperator::Gt.evaluate(15.0, 15.0));
        assert!(ComparisonOperator::Gte.evaluate(15.0, 15.0));
        assert!(ComparisonOperator::Lt.evaluate(1.0, 2.0));
        assert!(ComparisonOperator::Lte.evaluate(2.0, 2.0));
        assert!(ComparisonOperator::Eq.evaluate(0.3, 0.1 + 0.2));
        assert!(ComparisonOperator::Ne.evaluate(1.0, 2.0));
        assert!(!ComparisonOperator::Ne.evaluate(2.0, 2.0));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[test]
    fn test_rule_update_applies_only_set_fields() {
        let mut rule = AlertRule::new(
            "r1",
            "High latency",
            "avg_latency_ms",
            ComparisonOperator::Gt,
            100.0,
            AlertSeverity::Medium,
        );
        AlertRuleUpdate {
            enabled: Some(false),
            cooldown_ms: Some(60_000),
            ..Default::default()
        }
        .apply_to(&mut rule);

        assert!(!rule.enabled);
        assert_eq!(rule.cooldown_ms, 60_000);
        assert_eq!(rule.name, "High latency");
        assert_eq!(rule.severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_alert_from_rule_builds_description() {
        let rule = AlertRule::new(
            "r1",
            "Errors",
            "error_rate",
            ComparisonOperator::Gt,
            0.05,
            AlertSeverity::High,
        );
        let alert = Alert::from_rule(&rule, 0.2);
        assert_eq!(alert.rule_id, "r1");
        assert_eq!(alert.threshold, 0.05);
        assert_eq!(alert.description, "error_rate > 0.05 (observed 0.2)");
    }

    #[test]
    fn test_rule_deserializes_action_type_field() {
        let rule: AlertRule = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "name": "n",
            "condition": {"metric": "m", "operator": "gte", "threshold": 1.0, "time_window_ms": 1000},
            "severity": "critical",
            "actions": [{"type": "webhook", "config": {"url": "http://hooks.local"}}],
            "cooldown_ms": 5000
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.actions[0].action_type, AlertActionType::Webhook);
        assert_eq!(rule.condition.operator, ComparisonOperator::Gte);
    }
}
