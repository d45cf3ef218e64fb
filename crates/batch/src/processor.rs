//! Batch Processor
//!
//! Jobs are queued in submission order and drained by a single background
//! task. Each job walks its source in slices of `batch_size`; items within a
//! slice are predicted concurrently and fail independently. A slice whose
//! read fails is counted as errors and the job moves on.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use realtime_pipeline_types::{
    BatchJob, BatchJobStatus, InferenceBackend, PipelineError, Result, RetryPolicy,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::BatchEvent;
use crate::source::BatchSource;

/// Default slice size for a job
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default pause between slices
pub const DEFAULT_SLICE_YIELD: Duration = Duration::from_millis(10);

/// Submission parameters for one batch job
#[derive(Clone)]
pub struct BatchJobConfig {
    pub model_id: String,
    pub batch_size: usize,
    pub source: Arc<dyn BatchSource>,
    /// Recorded on the job; jobs are never retried automatically
    pub retry_policy: Option<RetryPolicy>,
    pub output_location: Option<String>,
}

impl BatchJobConfig {
    pub fn new(model_id: impl Into<String>, source: Arc<dyn BatchSource>) -> Self {
        Self {
            model_id: model_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            source,
            retry_policy: None,
            output_location: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn with_output_location(mut self, output_location: impl Into<String>) -> Self {
        self.output_location = Some(output_location.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model_id must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchJobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJobConfig")
            .field("model_id", &self.model_id)
            .field("batch_size", &self.batch_size)
            .field("retry_policy", &self.retry_policy)
            .field("output_location", &self.output_location)
            .finish_non_exhaustive()
    }
}

/// Batch processor settings
#[derive(Debug, Clone)]
pub struct BatchProcessorConfig {
    /// Pause after each slice so other work can make progress
    pub slice_yield: Duration,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for BatchProcessorConfig {
    fn default() -> Self {
        Self {
            slice_yield: DEFAULT_SLICE_YIELD,
            event_capacity: 1024,
        }
    }
}

struct Inner {
    config: BatchProcessorConfig,
    inference: Arc<dyn InferenceBackend>,
    jobs: DashMap<String, BatchJob>,
    /// Sources of jobs that have not started yet
    sources: DashMap<String, Arc<dyn BatchSource>>,
    submission_order: Mutex<Vec<String>>,
    queue: Mutex<VecDeque<String>>,
    processing: AtomicBool,
    events: broadcast::Sender<BatchEvent>,
}

/// Sequential batch job runner
pub struct BatchProcessor {
    inner: Arc<Inner>,
}

impl BatchProcessor {
    pub fn new(inference: Arc<dyn InferenceBackend>) -> Self {
        Self::with_config(inference, BatchProcessorConfig::default())
    }

    pub fn with_config(inference: Arc<dyn InferenceBackend>, config: BatchProcessorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                inference,
                jobs: DashMap::new(),
                sources: DashMap::new(),
                submission_order: Mutex::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Queue a job and return its id; the job starts once earlier jobs finish
    pub fn submit_job(&self, config: BatchJobConfig) -> Result<String> {
        config.validate()?;

        let job = BatchJob::new(
            config.model_id,
            config.batch_size,
            config.retry_policy.unwrap_or_default(),
            config.output_location,
        );
        let job_id = job.id.clone();

        info!(
            "Batch job {} queued (model={}, batch_size={})",
            job_id, job.model_id, job.batch_size
        );

        self.inner.jobs.insert(job_id.clone(), job);
        self.inner.sources.insert(job_id.clone(), config.source);
        self.inner.submission_order.lock().push(job_id.clone());
        self.inner.queue.lock().push_back(job_id.clone());

        self.ensure_draining();
        Ok(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Option<BatchJob> {
        self.inner.jobs.get(job_id).map(|job| job.clone())
    }

    /// All jobs in submission order
    pub fn list_jobs(&self) -> Vec<BatchJob> {
        self.inner
            .submission_order
            .lock()
            .iter()
            .filter_map(|id| self.get_job(id))
            .collect()
    }

    /// Jobs waiting to start
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether the drain task is active
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Cancel a running job
    ///
    /// Returns `Ok(true)` if the job was running and is now cancelled,
    /// `Ok(false)` for jobs in any other state. The job stops before its next slice.
    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let mut job = self
            .inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::not_found("batch job", job_id))?;

        if job.status != BatchJobStatus::Running {
            debug!("Batch job {} not running ({:?}), nothing to cancel", job_id, job.status);
            return Ok(false);
        }

        job.status = BatchJobStatus::Cancelled;
        job.performance.end_time = Some(Utc::now());
        drop(job);

        info!("Batch job {} cancelled", job_id);
        self.inner.emit(BatchEvent::JobCancelled {
            job_id: job_id.to_string(),
        });
        Ok(true)
    }

    fn ensure_draining(&self) {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(drain_queue(self.inner.clone()));
        }
    }
}

async fn drain_queue(inner: Arc<Inner>) {
    debug!("Batch drain task started");

    loop {
        let next = inner.queue.lock().pop_front();
        match next {
            Some(job_id) => inner.process_job(&job_id).await,
            None => {
                inner.processing.store(false, Ordering::SeqCst);
                // A submit may have raced with the empty check above
                let pending = !inner.queue.lock().is_empty();
                if pending
                    && inner
                        .processing
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                break;
            }
        }
    }

    debug!("Batch drain task finished");
}

impl Inner {
    fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }

    /// Apply `f` to a job and return a copy of the result
    fn update_job<F>(&self, job_id: &str, f: F) -> Option<BatchJob>
    where
        F: FnOnce(&mut BatchJob),
    {
        self.jobs.get_mut(job_id).map(|mut job| {
            f(&mut job);
            job.clone()
        })
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .map(|job| job.status == BatchJobStatus::Cancelled)
            .unwrap_or(true)
    }

    async fn process_job(&self, job_id: &str) {
        let Some((_, source)) = self.sources.remove(job_id) else {
            error!("Batch job {} has no data source", job_id);
            return;
        };

        let Some(job) = self.update_job(job_id, |job| {
            job.status = BatchJobStatus::Running;
            job.performance.start_time = Some(Utc::now());
        }) else {
            return;
        };
        let started = Instant::now();

        info!("Batch job {} started (model={})", job_id, job.model_id);
        self.emit(BatchEvent::JobStarted {
            job_id: job_id.to_string(),
            model_id: job.model_id.clone(),
        });

        let total = match source.total().await {
            Ok(total) => total,
            Err(e) => {
                self.fail_job(job_id, &e);
                return;
            }
        };
        self.update_job(job_id, |job| {
            job.progress.total = total as u64;
        });

        let mut offset = 0;
        while offset < total {
            if self.is_cancelled(job_id) {
                info!("Batch job {} stopping at offset {} after cancellation", job_id, offset);
                return;
            }

            let slice_len = job.batch_size.min(total - offset);
            let outcome = match source.read_slice(offset, slice_len).await {
                Ok(items) => {
                    let read = items.len().min(slice_len);
                    let failed_items = self.predict_slice(&job.model_id, items).await;
                    Ok((read, failed_items))
                }
                Err(e) => Err(e),
            };

            let mut still_running = false;
            let Some(updated) = self.update_job(job_id, |job| {
                if job.status != BatchJobStatus::Running {
                    return;
                }
                still_running = true;
                match &outcome {
                    Ok((read, failed_items)) => {
                        // Items missing from a short read count as errors
                        job.progress.processed += *read as u64;
                        job.progress.errors += (slice_len - read) as u64;
                        job.progress.failed_items += failed_items;
                    }
                    Err(_) => job.progress.errors += slice_len as u64,
                }
                job.progress.update_percentage();
            }) else {
                return;
            };
            if !still_running {
                info!(
                    "Batch job {} cancelled while slice at {} was in flight",
                    job_id, offset
                );
                return;
            }

            match outcome {
                Ok((read, failed_items)) => {
                    if read < slice_len {
                        warn!(
                            "Batch job {} slice at {} returned {} of {} items",
                            job_id, offset, read, slice_len
                        );
                    }
                    debug!(
                        "Batch job {} slice at {} done ({} items, {} failed), {:.1}%",
                        job_id, offset, read, failed_items, updated.progress.percentage
                    );
                }
                Err(e) => warn!(
                    "Batch job {} slice at {} failed to read: {}",
                    job_id, offset, e
                ),
            }

            self.emit(BatchEvent::JobProgress {
                job_id: job_id.to_string(),
                progress: updated.progress,
            });

            offset += slice_len;
            tokio::time::sleep(self.config.slice_yield).await;
        }

        self.complete_job(job_id, started);
    }

    /// Predict every item of a slice concurrently; returns the number of failed items
    async fn predict_slice(&self, model_id: &str, items: Vec<Value>) -> u64 {
        let calls = items.iter().map(|item| async move {
            match serde_json::to_string(item) {
                Ok(input) => self.inference.predict(model_id, &input).await,
                Err(e) => Err(PipelineError::from(e)),
            }
        });

        let mut failed = 0;
        for outcome in join_all(calls).await {
            if let Err(e) = outcome {
                debug!("Batch item prediction failed: {}", e);
                failed += 1;
            }
        }
        failed
    }

    fn complete_job(&self, job_id: &str, started: Instant) {
        let elapsed = started.elapsed();
        let mut completed = None;

        self.update_job(job_id, |job| {
            if job.status != BatchJobStatus::Running {
                return;
            }
            job.status = BatchJobStatus::Completed;
            job.performance.end_time = Some(Utc::now());
            job.performance.duration_ms = Some(elapsed.as_millis() as u64);
            let secs = elapsed.as_secs_f64();
            job.performance.throughput = Some(if secs > 0.0 {
                job.progress.processed as f64 / secs
            } else {
                job.progress.processed as f64
            });
            completed = Some((job.progress.clone(), job.performance.clone()));
        });

        if let Some((progress, performance)) = completed {
            info!(
                "Batch job {} completed: {} processed, {} errors in {}ms",
                job_id,
                progress.processed,
                progress.errors,
                performance.duration_ms.unwrap_or_default()
            );
            self.emit(BatchEvent::JobCompleted {
                job_id: job_id.to_string(),
                progress,
                performance,
            });
        }
    }

    fn fail_job(&self, job_id: &str, e: &PipelineError) {
        error!("Batch job {} failed: {}", job_id, e);
        self.update_job(job_id, |job| {
            job.status = BatchJobStatus::Failed;
            job.error = Some(e.to_string());
            job.performance.end_time = Some(Utc::now());
        });
        self.emit(BatchEvent::JobFailed {
            job_id: job_id.to_string(),
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GeneratedSource;

    #[test]
    fn test_job_config_defaults() {
        let config = BatchJobConfig::new("model", Arc::new(GeneratedSource::new(1)));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.retry_policy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_job_config_validation() {
        let source = Arc::new(GeneratedSource::new(1));
        assert!(BatchJobConfig::new("", source.clone()).validate().is_err());
        assert!(BatchJobConfig::new("m", source)
            .with_batch_size(0)
            .validate()
            .is_err());
    }
}
