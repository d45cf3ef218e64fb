//! Integration tests for the real-time processing service

mod common;

use batch::GeneratedSource;
use common::*;
use realtime_pipeline_config::ERROR_RATE_METRIC;
use realtime_pipeline_types::{AlertRuleUpdate, BatchJobStatus, PipelineError};
use realtime_service::{RealTimeProcessingService, ServiceEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let t = test_service(test_config());
    let mut rx = t.service.subscribe();

    t.service.initialize().await.unwrap();
    t.service.initialize().await.unwrap();

    assert!(t.service.is_initialized());
    let rules = t.service.get_alert_rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id, "high-error-rate");
    assert_eq!(rules[1].id, "high-latency");

    assert!(next_event_named(&mut rx, "rule_added", EVENT_TIMEOUT)
        .await
        .is_some());
}

#[tokio::test]
async fn test_invalid_service_config_rejected() {
    let mut config = test_config();
    config.service.event_channel_capacity = 0;

    let result = RealTimeProcessingService::new(
        config,
        Arc::new(MockInference::new()),
        Arc::new(integrations::InMemoryMetricsStore::new()),
        Arc::new(integrations::LogNotifier),
    );
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_duplicate_stream_rejected() {
    let t = test_service(test_config());
    t.service.create_stream(stream_config("clicks", 2)).await.unwrap();

    let err = t
        .service
        .create_stream(stream_config("clicks", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyExists { kind: "stream", .. }));
    assert_eq!(t.service.list_streams(), vec!["clicks".to_string()]);
}

#[tokio::test]
async fn test_unknown_stream_operations_fail() {
    let t = test_service(test_config());

    assert!(matches!(
        t.service.start_stream("ghost").await,
        Err(PipelineError::NotFound { .. })
    ));
    assert!(matches!(
        t.service.stop_stream("ghost").await,
        Err(PipelineError::NotFound { .. })
    ));
    assert!(matches!(
        t.service.ingest_data("ghost", json!({})).await,
        Err(PipelineError::NotFound { .. })
    ));
    assert!(matches!(
        t.service.get_stream_metrics("ghost"),
        Err(PipelineError::NotFound { .. })
    ));
    assert!(matches!(
        t.service.remove_stream("ghost").await,
        Err(PipelineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_ingest_before_start_fails() {
    let t = test_service(test_config());
    t.service.create_stream(stream_config("clicks", 2)).await.unwrap();

    let err = t
        .service
        .ingest_data("clicks", json!({ "x": 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotRunning(_)));
}

#[tokio::test]
async fn test_stream_end_to_end_events() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();
    let mut rx = t.service.subscribe();

    t.service.create_stream(stream_config("clicks", 2)).await.unwrap();
    t.service.start_stream("clicks").await.unwrap();
    for i in 0..5 {
        t.service
            .ingest_data("clicks", json!({ "n": i }))
            .await
            .unwrap();
    }
    t.service.stop_stream("clicks").await.unwrap();

    let names = collect_names(&mut rx, Duration::from_millis(500)).await;
    assert!(names.contains(&"stream_created"));
    assert!(names.contains(&"stream_started"));
    assert!(names.contains(&"stream_stopped"));
    assert!(!names.contains(&"started"));
    assert_eq!(names.iter().filter(|n| **n == "prediction").count(), 5);
    assert!(names.iter().filter(|n| **n == "stream_batch_processed").count() >= 3);

    let metrics = t.service.get_stream_metrics("clicks").unwrap();
    assert_eq!(metrics.predictions.total, 5);
    assert_eq!(metrics.predictions.successful, 5);
    assert_eq!(metrics.buffer_size, 0);
    assert_eq!(t.inference.calls(), 5);
}

#[tokio::test]
async fn test_stream_errors_raise_error_rate_alert() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();
    let mut rx = t.service.subscribe();

    t.service.create_stream(stream_config("scores", 2)).await.unwrap();
    t.service.start_stream("scores").await.unwrap();
    t.service
        .ingest_data("scores", json!({ "fail": true }))
        .await
        .unwrap();
    t.service
        .ingest_data("scores", json!({ "fail": true }))
        .await
        .unwrap();

    let event = next_event_named(&mut rx, "alert_triggered", EVENT_TIMEOUT)
        .await
        .expect("alert forwarded");
    match event {
        ServiceEvent::Alert(alerting::AlertEvent::AlertTriggered { alert }) => {
            assert_eq!(alert.rule_id, "high-error-rate");
            assert_eq!(alert.metric, ERROR_RATE_METRIC);
            assert_eq!(alert.value, 1.0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let recent = t.service.recent_alerts();
    assert_eq!(recent.len(), 1);
    assert!(!recent.iter().any(|a| a.rule_id == "high-latency"));

    let store = t.store.clone();
    assert!(
        wait_for_condition(
            || store.audit_records().len() == 1,
            EVENT_TIMEOUT,
            Duration::from_millis(10)
        )
        .await
    );

    t.service.cleanup().await;
}

#[tokio::test]
async fn test_batch_job_delegation() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();
    let mut rx = t.service.subscribe();

    let job = t
        .service
        .new_batch_job("bulk-model", Arc::new(GeneratedSource::new(20)));
    let job_id = t.service.submit_batch_job(job).unwrap();

    let event = next_event_named(&mut rx, "batch_job_completed", EVENT_TIMEOUT)
        .await
        .expect("completion forwarded");
    assert!(matches!(event, ServiceEvent::Batch(_)));

    let job = t.service.get_batch_job(&job_id).unwrap();
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.batch_size, 5);
    assert_eq!(job.progress.processed, 20);
    assert_eq!(t.service.list_batch_jobs().len(), 1);
    assert!(!t.service.cancel_batch_job(&job_id).unwrap());
}

#[tokio::test]
async fn test_alert_rule_management() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();

    let mut condition = t.service.alert_engine().get_rule("high-latency").unwrap().condition;
    condition.threshold = 10.0;
    let updated = t
        .service
        .update_alert_rule(
            "high-latency",
            AlertRuleUpdate {
                condition: Some(condition),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.condition.threshold, 10.0);

    let fired = t.service.check_metric("avg_latency_ms", 25.0).await;
    assert_eq!(fired.len(), 1);

    assert!(t.service.remove_alert_rule("high-latency"));
    assert!(!t.service.remove_alert_rule("high-latency"));
    assert_eq!(t.service.get_alert_rules().len(), 1);
}

#[tokio::test]
async fn test_remove_stream() {
    let t = test_service(test_config());
    let mut rx = t.service.subscribe();

    t.service.create_stream(stream_config("views", 10)).await.unwrap();
    t.service.start_stream("views").await.unwrap();
    t.service
        .ingest_data("views", json!({ "page": "/" }))
        .await
        .unwrap();

    t.service.remove_stream("views").await.unwrap();

    assert!(t.service.list_streams().is_empty());
    assert_eq!(t.inference.calls(), 1);
    assert!(next_event_named(&mut rx, "stream_removed", EVENT_TIMEOUT)
        .await
        .is_some());
    assert!(matches!(
        t.service.ingest_data("views", json!({})).await,
        Err(PipelineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_cleanup_stops_streams_and_resets() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();

    for id in ["a", "b"] {
        t.service.create_stream(stream_config(id, 10)).await.unwrap();
        t.service.start_stream(id).await.unwrap();
        t.service.ingest_data(id, json!({ "id": id })).await.unwrap();
    }
    // One stream already stopped
    t.service.stop_stream("b").await.unwrap();

    t.service.cleanup().await;

    assert!(t.service.list_streams().is_empty());
    assert!(!t.service.is_initialized());
    assert_eq!(t.inference.calls(), 2);

    t.service.initialize().await.unwrap();
    assert!(t.service.is_initialized());
    assert_eq!(t.service.get_alert_rules().len(), 2);
}

#[tokio::test]
async fn test_cleanup_publishes_final_stream_events() {
    let t = test_service(test_config());
    t.service.initialize().await.unwrap();
    let mut rx = t.service.subscribe();

    t.service.create_stream(stream_config("late", 10)).await.unwrap();
    t.service.start_stream("late").await.unwrap();
    t.service
        .ingest_data("late", json!({ "n": 1 }))
        .await
        .unwrap();

    // The buffered record is only flushed by the stop inside cleanup
    t.service.cleanup().await;

    let names = collect_names(&mut rx, Duration::from_millis(200)).await;
    let flushed = names
        .iter()
        .position(|n| *n == "stream_batch_processed")
        .expect("final flush forwarded");
    let stopped = names
        .iter()
        .position(|n| *n == "stream_stopped")
        .expect("stop forwarded");
    assert!(flushed < stopped);
    assert_eq!(t.inference.calls(), 1);
}

#[tokio::test]
async fn test_create_stream_with_defaults() {
    let mut config = test_config();
    config.stream_defaults.batch_size = 7;
    let t = test_service(config);

    t.service
        .create_stream_with_defaults("orders", "fraud-model")
        .await
        .unwrap();

    let metrics = t.service.get_stream_metrics("orders").unwrap();
    assert_eq!(metrics.stream_id, "orders");
    assert_eq!(metrics.buffer_size, 0);
}
