//! `simulate-stream` and `simulate-batch` commands

use async_trait::async_trait;
use batch::GeneratedSource;
use clap::{Args, ValueEnum};
use colored::Colorize;
use integrations::{InMemoryMetricsStore, LogNotifier};
use realtime_pipeline_config::PipelineConfig;
use realtime_pipeline_types::{
    BackpressureStrategy, BatchJobStatus, InferenceBackend, PipelineError, Prediction, Result,
    StreamMetrics,
};
use realtime_service::{RealTimeProcessingService, ServiceEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use streaming::{TelemetryConfig, TelemetryProvider};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Backend answering every record with its own input
pub struct EchoInference {
    delay: Duration,
    fail_every: Option<usize>,
    calls: std::sync::atomic::AtomicUsize,
}

impl EchoInference {
    pub fn new(delay: Duration, fail_every: Option<usize>) -> Self {
        Self {
            delay,
            fail_every,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceBackend for EchoInference {
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction> {
        let call = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(every) = self.fail_every.filter(|n| *n > 0) {
            if call % every == 0 {
                return Err(PipelineError::Inference(format!(
                    "simulated failure on call {}",
                    call
                )));
            }
        }
        let echoed: serde_json::Value = serde_json::from_str(input)?;
        Ok(Prediction::new(model_id, echoed).with_confidence(1.0))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StrategyArg {
    Drop,
    Buffer,
    Throttle,
}

impl From<StrategyArg> for BackpressureStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Drop => Self::Drop,
            StrategyArg::Buffer => Self::Buffer,
            StrategyArg::Throttle => Self::Throttle,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateStreamArgs {
    /// Number of records to ingest
    #[arg(short = 'n', long, default_value = "100")]
    pub records: usize,

    /// Stream batch size (defaults to configuration)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Backpressure strategy (defaults to configuration)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Simulated inference latency in milliseconds
    #[arg(long, default_value = "5")]
    pub delay_ms: u64,

    /// Fail every Nth inference call
    #[arg(long, value_name = "N")]
    pub fail_every: Option<usize>,

    /// Model id
    #[arg(long, default_value = "echo-model")]
    pub model: String,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateBatchArgs {
    /// Number of generated items
    #[arg(short = 'n', long, default_value = "10000")]
    pub records: usize,

    /// Slice size (defaults to configuration)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Simulated inference latency in milliseconds
    #[arg(long, default_value = "0")]
    pub delay_ms: u64,

    /// Model id
    #[arg(long, default_value = "echo-model")]
    pub model: String,
}

fn build_service(
    config: PipelineConfig,
    inference: Arc<EchoInference>,
) -> anyhow::Result<(RealTimeProcessingService, Option<TelemetryProvider>)> {
    let telemetry = if config.observability.telemetry_enabled {
        Some(TelemetryProvider::init(TelemetryConfig {
            service_name: config.service.name.clone(),
            ..Default::default()
        })?)
    } else {
        None
    };

    let mut service = RealTimeProcessingService::new(
        config,
        inference,
        Arc::new(InMemoryMetricsStore::new()),
        Arc::new(LogNotifier),
    )?;
    if let Some(provider) = &telemetry {
        service = service.with_telemetry(provider.metrics());
    }
    Ok((service, telemetry))
}

fn shutdown_telemetry(telemetry: Option<TelemetryProvider>) {
    if let Some(provider) = telemetry {
        if let Err(e) = provider.shutdown() {
            warn!("Telemetry shutdown failed: {}", e);
        }
    }
}

pub async fn simulate_stream(
    config: PipelineConfig,
    args: &SimulateStreamArgs,
) -> anyhow::Result<()> {
    let stream_id = "simulated";
    let mut stream_config = config.stream_defaults.stream_config(stream_id, &args.model);
    if let Some(batch_size) = args.batch_size {
        stream_config.batch_size = batch_size;
    }
    if let Some(strategy) = args.strategy {
        stream_config.backpressure_strategy = strategy.into();
    }

    let inference = Arc::new(EchoInference::new(
        Duration::from_millis(args.delay_ms),
        args.fail_every,
    ));
    let (service, telemetry) = build_service(config, inference)?;
    service.initialize().await?;

    println!(
        "{} {} records (batch_size={}, strategy={})",
        "Simulating stream:".bold().cyan(),
        args.records,
        stream_config.batch_size,
        stream_config.backpressure_strategy.name()
    );

    service.create_stream(stream_config).await?;
    service.start_stream(stream_id).await?;

    let mut rejected = 0usize;
    let mut throttled = 0usize;
    for i in 0..args.records {
        let record = json!({ "index": i, "value": i as f64 * 0.5 });
        match service.ingest_data(stream_id, record).await {
            Ok(receipt) => {
                if let Some(delay) = receipt.throttle {
                    throttled += 1;
                    tokio::time::sleep(delay).await;
                }
            }
            Err(PipelineError::BufferFull { .. }) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }

    service.stop_stream(stream_id).await?;
    let metrics = service.get_stream_metrics(stream_id)?;
    print_stream_metrics(&metrics, rejected, throttled);

    let alerts = service.recent_alerts();
    if !alerts.is_empty() {
        println!();
        println!("{}", "Alerts:".bold().yellow());
        for alert in &alerts {
            println!(
                "  {} [{}] {}",
                alert.rule_id.yellow(),
                alert.severity.name(),
                alert.description
            );
        }
    }

    service.cleanup().await;
    shutdown_telemetry(telemetry);
    Ok(())
}

fn print_stream_metrics(metrics: &StreamMetrics, rejected: usize, throttled: usize) {
    println!();
    println!("{}", "Results:".bold().cyan());
    println!("{}", "-".repeat(40));
    println!("  {:<20} {}", "predictions", metrics.predictions.total);
    println!(
        "  {:<20} {}",
        "successful",
        metrics.predictions.successful.to_string().green()
    );
    let failed = metrics.predictions.failed.to_string();
    if metrics.predictions.failed > 0 {
        println!("  {:<20} {}", "failed", failed.red());
    } else {
        println!("  {:<20} {}", "failed", failed);
    }
    println!("  {:<20} {:.2}%", "error rate", metrics.errors.rate * 100.0);
    println!("  {:<20} {:.1} rec/s", "throughput", metrics.throughput);
    println!(
        "  {:<20} avg {:.2}ms / p95 {:.2}ms / p99 {:.2}ms",
        "latency", metrics.latency.avg, metrics.latency.p95, metrics.latency.p99
    );
    println!("  {:<20} {}", "rejected", rejected);
    println!("  {:<20} {}", "throttled", throttled);
    println!("  {:<20} {}", "buffered", metrics.buffer_size);
}

pub async fn simulate_batch(config: PipelineConfig, args: &SimulateBatchArgs) -> anyhow::Result<()> {
    let inference = Arc::new(EchoInference::new(Duration::from_millis(args.delay_ms), None));
    let (service, telemetry) = build_service(config, inference)?;
    service.initialize().await?;
    let mut events = service.subscribe();

    let mut job = service.new_batch_job(&args.model, Arc::new(GeneratedSource::new(args.records)));
    if let Some(batch_size) = args.batch_size {
        job = job.with_batch_size(batch_size);
    }
    let job_id = service.submit_batch_job(job)?;

    println!(
        "{} job {} over {} items",
        "Simulating batch:".bold().cyan(),
        job_id,
        args.records
    );

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!("Skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let ServiceEvent::Batch(batch_event) = &event else {
            continue;
        };
        if batch_event.job_id() != job_id {
            continue;
        }
        match batch_event {
            batch::BatchEvent::JobProgress { progress, .. } => {
                println!(
                    "  {:>6.1}%  processed={} errors={}",
                    progress.percentage, progress.processed, progress.errors
                );
            }
            batch::BatchEvent::JobCompleted { .. }
            | batch::BatchEvent::JobFailed { .. }
            | batch::BatchEvent::JobCancelled { .. } => break,
            batch::BatchEvent::JobStarted { .. } => {}
        }
    }

    let job = service
        .get_batch_job(&job_id)
        .ok_or_else(|| PipelineError::not_found("batch job", job_id.clone()))?;

    println!();
    let status = match job.status {
        BatchJobStatus::Completed => "completed".green().bold(),
        BatchJobStatus::Failed => "failed".red().bold(),
        BatchJobStatus::Cancelled => "cancelled".yellow().bold(),
        BatchJobStatus::Queued | BatchJobStatus::Running => "unfinished".yellow().bold(),
    };
    println!("{} {}", "Job".bold(), status);
    println!("  {:<20} {}", "processed", job.progress.processed);
    println!("  {:<20} {}", "failed items", job.progress.failed_items);
    println!("  {:<20} {}", "errors", job.progress.errors);
    if let Some(throughput) = job.performance.throughput {
        println!("  {:<20} {:.1} items/s", "throughput", throughput);
    }
    if let Some(duration_ms) = job.performance.duration_ms {
        println!("  {:<20} {}ms", "duration", duration_ms);
    }
    if let Some(error) = &job.error {
        println!("  {:<20} {}", "error", error.red());
    }

    service.cleanup().await;
    shutdown_telemetry(telemetry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_input() {
        let echo = EchoInference::new(Duration::ZERO, None);
        let prediction = echo.predict("m", r#"{"a":1}"#).await.unwrap();
        assert_eq!(prediction.output, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_echo_fails_every_nth_call() {
        let echo = EchoInference::new(Duration::ZERO, Some(2));
        assert!(echo.predict("m", "1").await.is_ok());
        assert!(echo.predict("m", "2").await.is_err());
        assert!(echo.predict("m", "3").await.is_ok());
    }

    #[test]
    fn test_strategy_arg_conversion() {
        assert_eq!(
            BackpressureStrategy::from(StrategyArg::Throttle),
            BackpressureStrategy::Throttle
        );
    }
}
