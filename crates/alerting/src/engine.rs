//! Alert Engine
//!
//! Rules are evaluated against every recorded value of their metric. The
//! cooldown check and re-arm happen in one step per rule, so concurrent
//! evaluations of the same rule fire at most once per cooldown.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use realtime_pipeline_types::{
    Alert, AlertRule, AlertRuleUpdate, MetricSample, MetricsStore, Notifier, PipelineError,
    Result,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::AlertEvent;
use crate::history::MetricHistory;

/// Alert engine settings
#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    /// How long metric samples are retained
    pub history_retention: Duration,
    /// Number of fired alerts kept for inspection
    pub recent_alerts_capacity: usize,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            history_retention: Duration::from_secs(5 * 60),
            recent_alerts_capacity: 100,
            event_capacity: 1024,
        }
    }
}

/// Threshold alert engine
pub struct AlertEngine {
    config: AlertEngineConfig,
    rules: DashMap<String, AlertRule>,
    history: DashMap<String, MetricHistory>,
    /// Cooldown deadline per rule id
    cooldowns: DashMap<String, Instant>,
    recent_alerts: Mutex<VecDeque<Alert>>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn MetricsStore>,
    events: broadcast::Sender<AlertEvent>,
}

impl AlertEngine {
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<dyn MetricsStore>) -> Self {
        Self::with_config(notifier, store, AlertEngineConfig::default())
    }

    pub fn with_config(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn MetricsStore>,
        config: AlertEngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            rules: DashMap::new(),
            history: DashMap::new(),
            cooldowns: DashMap::new(),
            recent_alerts: Mutex::new(VecDeque::new()),
            notifier,
            store,
            events,
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AlertEvent) {
        let _ = self.events.send(event);
    }

    /// Register a rule, replacing any rule with the same id
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        validate_rule(&rule)?;

        let rule_id = rule.id.clone();
        info!(
            "Alert rule {} registered: {} {} {} ({})",
            rule_id,
            rule.condition.metric,
            rule.condition.operator.symbol(),
            rule.condition.threshold,
            rule.severity.name()
        );
        if self.rules.insert(rule_id.clone(), rule).is_some() {
            debug!("Alert rule {} replaced an existing rule", rule_id);
        }

        self.emit(AlertEvent::RuleAdded { rule_id });
        Ok(())
    }

    /// Remove a rule; returns whether it existed
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.remove(rule_id).is_some();
        self.cooldowns.remove(rule_id);

        if removed {
            info!("Alert rule {} removed", rule_id);
            self.emit(AlertEvent::RuleRemoved {
                rule_id: rule_id.to_string(),
            });
        }
        removed
    }

    /// Patch a rule in place and return the updated rule
    pub fn update_rule(&self, rule_id: &str, update: AlertRuleUpdate) -> Result<AlertRule> {
        let updated = {
            let mut rule = self
                .rules
                .get_mut(rule_id)
                .ok_or_else(|| PipelineError::not_found("alert rule", rule_id))?;
            let mut patched = rule.clone();
            update.apply_to(&mut patched);
            validate_rule(&patched)?;
            *rule = patched.clone();
            patched
        };

        info!("Alert rule {} updated", rule_id);
        self.emit(AlertEvent::RuleUpdated {
            rule_id: rule_id.to_string(),
        });
        Ok(updated)
    }

    /// All rules, ordered by id
    pub fn get_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.get(rule_id).map(|r| r.clone())
    }

    /// Record a metric value and evaluate every enabled rule on that metric
    ///
    /// Returns the alerts fired by this value.
    pub async fn check_metric(&self, metric: &str, value: f64) -> Vec<Alert> {
        let retention = self.config.history_retention;
        self.history
            .entry(metric.to_string())
            .or_insert_with(|| MetricHistory::new(retention))
            .record(value);

        let candidates: Vec<AlertRule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.condition.metric == metric)
            .map(|r| r.value().clone())
            .collect();

        let mut fired = Vec::new();
        for rule in candidates {
            if !rule.matches(value) {
                continue;
            }
            if !self.try_enter_cooldown(&rule) {
                debug!("Alert rule {} in cooldown, skipping", rule.id);
                continue;
            }
            fired.push(self.trigger(&rule, value).await);
        }
        fired
    }

    /// Atomically check the rule's cooldown and re-arm it; false while cooling down
    fn try_enter_cooldown(&self, rule: &AlertRule) -> bool {
        let now = Instant::now();
        let cooldown = rule.cooldown();

        match self.cooldowns.entry(rule.id.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return false;
                }
                if cooldown.is_zero() {
                    entry.remove();
                } else {
                    entry.insert(now + cooldown);
                }
                true
            }
            Entry::Vacant(entry) => {
                if !cooldown.is_zero() {
                    entry.insert(now + cooldown);
                }
                true
            }
        }
    }

    async fn trigger(&self, rule: &AlertRule, value: f64) -> Alert {
        if let Some(mut stored) = self.rules.get_mut(&rule.id) {
            stored.last_triggered = Some(Utc::now());
        }

        let alert = Alert::from_rule(rule, value);
        warn!(
            "Alert {} fired [{}]: {}",
            rule.id,
            rule.severity.name(),
            alert.description
        );

        {
            let mut recent = self.recent_alerts.lock();
            recent.push_back(alert.clone());
            while recent.len() > self.config.recent_alerts_capacity {
                recent.pop_front();
            }
        }
        self.emit(AlertEvent::AlertTriggered {
            alert: alert.clone(),
        });

        for action in &rule.actions {
            match self
                .notifier
                .dispatch(action.action_type, &action.config, &alert)
                .await
            {
                Ok(()) => debug!(
                    "Alert {} delivered via {}",
                    alert.id,
                    action.action_type.name()
                ),
                Err(e) => {
                    error!(
                        "Alert action {} failed for rule {}: {}",
                        action.action_type.name(),
                        rule.id,
                        e
                    );
                    self.emit(AlertEvent::ActionFailed {
                        rule_id: rule.id.clone(),
                        alert_id: alert.id,
                        action_type: action.action_type,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.store.save_audit_record(&alert).await {
            warn!("Failed to persist audit record for alert {}: {}", alert.id, e);
        }

        alert
    }

    /// Whether the rule is currently suppressed
    pub fn is_in_cooldown(&self, rule_id: &str) -> bool {
        self.cooldowns
            .get(rule_id)
            .map(|deadline| *deadline > Instant::now())
            .unwrap_or(false)
    }

    /// Most recently fired alerts, oldest first
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.recent_alerts.lock().iter().cloned().collect()
    }

    /// Retained samples of a metric, oldest first
    pub fn metric_history(&self, metric: &str) -> Vec<MetricSample> {
        self.history
            .get(metric)
            .map(|h| h.samples())
            .unwrap_or_default()
    }
}

fn validate_rule(rule: &AlertRule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(PipelineError::InvalidConfig(
            "alert rule id must not be empty".to_string(),
        ));
    }
    if rule.condition.metric.trim().is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "alert rule {} has no metric",
            rule.id
        )));
    }
    Ok(())
}
