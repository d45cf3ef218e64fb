//! Batch job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle status of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchJobStatus {
    /// Whether the job can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Backoff strategy between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy attached to a job
///
/// The batch processor records this policy but never applies it; it is
/// metadata for operators and callers that resubmit failed jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_strategy: BackoffStrategy,
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms;
        let attempt = attempt.max(1);
        let millis = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2_u64.saturating_pow((attempt - 1).min(20)))
            }
        };
        Duration::from_millis(millis)
    }
}

/// Progress counters of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Total records in the job input
    pub total: u64,
    /// Records in slices that completed
    pub processed: u64,
    /// Records in slices that could not be processed
    pub errors: u64,
    /// Individual inference failures inside completed slices
    pub failed_items: u64,
    /// processed / total * 100
    pub percentage: f64,
}

impl JobProgress {
    /// Recompute the completion percentage
    pub fn update_percentage(&mut self) {
        self.percentage = if self.total == 0 {
            100.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        };
    }
}

/// Timing of a job run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPerformance {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Processed records per second
    pub throughput: Option<f64>,
}

/// A queued or executed batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub model_id: String,
    pub status: BatchJobStatus,
    /// Records per slice
    pub batch_size: usize,
    pub progress: JobProgress,
    pub performance: JobPerformance,
    pub retry_policy: RetryPolicy,
    pub output_location: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    /// Create a queued job with a generated id
    pub fn new(
        model_id: impl Into<String>,
        batch_size: usize,
        retry_policy: RetryPolicy,
        output_location: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            status: BatchJobStatus::Queued,
            batch_size,
            progress: JobProgress::default(),
            performance: JobPerformance::default(),
            retry_policy,
            output_location,
            error: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));

        let linear = RetryPolicy {
            backoff_strategy: BackoffStrategy::Linear,
            ..Default::default()
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(3_000));
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = BatchJob::new("model", 100, RetryPolicy::default(), None);
        assert_eq!(job.status, BatchJobStatus::Queued);
        assert!(!job.status.is_terminal());
        assert_eq!(job.progress.processed, 0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut progress = JobProgress {
            total: 10_000,
            processed: 2_500,
            ..Default::default()
        };
        progress.update_percentage();
        assert_eq!(progress.percentage, 25.0);
    }
}
