//! # Real-Time Pipeline - Integrations
//!
//! Collaborator implementations used by the service and the CLI:
//!
//! - [`HttpInferenceClient`]: model inference over HTTP
//! - [`HttpNotifier`]: webhook, Slack, PagerDuty and email-relay delivery
//! - [`LogNotifier`]: alert delivery to the log
//! - [`InMemoryMetricsStore`]: bounded checkpoint and audit storage
//!
//! ```no_run
//! use integrations::HttpInferenceClient;
//! use realtime_pipeline_config::InferenceSettings;
//! use realtime_pipeline_types::InferenceBackend;
//!
//! # async fn example() -> realtime_pipeline_types::Result<()> {
//! let client = HttpInferenceClient::new(&InferenceSettings::default())?;
//! let prediction = client.predict("fraud-v2", r#"{"amount": 42}"#).await?;
//! println!("{}", prediction.output);
//! # Ok(())
//! # }
//! ```

pub mod inference;
pub mod notifier;
pub mod store;

pub use inference::HttpInferenceClient;
pub use notifier::{HttpNotifier, LogNotifier};
pub use store::{InMemoryMetricsStore, StoredSnapshot};

/// User agent sent with every outbound request
pub const USER_AGENT: &str = concat!("realtime-pipeline/", env!("CARGO_PKG_VERSION"));
