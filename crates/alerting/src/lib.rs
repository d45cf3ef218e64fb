//! Threshold Alerting
//!
//! Rules compare incoming metric values against thresholds. A rule that fires
//! runs its notification actions, records an audit entry and then stays quiet
//! for its cooldown.

pub mod engine;
pub mod events;
pub mod history;

pub use engine::{AlertEngine, AlertEngineConfig};
pub use events::AlertEvent;
pub use history::MetricHistory;
