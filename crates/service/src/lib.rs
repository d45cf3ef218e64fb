//! Real-time processing service
//!
//! Owns the registry of named streams, the batch job runner and the alert
//! engine. Stream metrics are fed into the alert engine after every flush,
//! and the events of every component are re-published on one channel.

pub mod events;
pub mod service;

pub use events::ServiceEvent;
pub use service::RealTimeProcessingService;
