//! Error types for the pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
///
/// Structural variants (`NotFound`, `AlreadyExists`, `NotRunning`,
/// `AlreadyRunning`, `InvalidConfig`) are surfaced to the immediate caller.
/// Collaborator variants (`Inference`, `Persistence`, `Notification`,
/// `Source`) describe data-plane failures that the engines isolate and report
/// through events.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("stream {0} is not running")]
    NotRunning(String),

    #[error("stream {0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Buffer full for stream {stream_id}: {size} records (ceiling {ceiling})")]
    BufferFull {
        stream_id: String,
        size: usize,
        ceiling: usize,
    },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Batch source error: {0}")]
    Source(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Build a not-found error for the given entity kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Build an already-exists error for the given entity kind
    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    /// Stable short name of the error variant, used as the error-type key in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotRunning(_) => "not_running",
            Self::AlreadyRunning(_) => "already_running",
            Self::InvalidConfig(_) => "invalid_config",
            Self::BufferFull { .. } => "buffer_full",
            Self::Inference(_) => "inference",
            Self::Persistence(_) => "persistence",
            Self::Notification(_) => "notification",
            Self::Source(_) => "source",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }

    /// Whether this error describes a caller mistake (bad id or wrong state)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::NotRunning(_)
                | Self::AlreadyRunning(_)
                | Self::InvalidConfig(_)
        )
    }
}
