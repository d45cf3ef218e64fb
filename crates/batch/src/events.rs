//! Batch processor events

use realtime_pipeline_types::{JobPerformance, JobProgress};
use serde::Serialize;

/// Events published by the batch processor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    JobStarted {
        job_id: String,
        model_id: String,
    },
    JobProgress {
        job_id: String,
        progress: JobProgress,
    },
    JobCompleted {
        job_id: String,
        progress: JobProgress,
        performance: JobPerformance,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    JobCancelled {
        job_id: String,
    },
}

impl BatchEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::JobProgress { .. } => "job_progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobCancelled { .. } => "job_cancelled",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => job_id,
        }
    }
}
