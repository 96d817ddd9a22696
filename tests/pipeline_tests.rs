mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use audit_relay::audit::event::new_trace_id;
use audit_relay::audit::{AuditEvent, AuditStore, DeliveryResult, Operator, ReconcileJob, RequestContext};
use audit_relay::config::{ReconcileConfig, ReportConfig};
use audit_relay::models::{AuditRecord, OperationType, ReportStatus};

use common::{Pipeline, Reply, StubReceiver};

fn update_event() -> AuditEvent {
    AuditEvent {
        module_name: "customer".to_string(),
        operation_type: OperationType::Update,
        business_id: Some("1001".to_string()),
        operator: Operator {
            user_id: 42,
            username: "alice".to_string(),
            role_id: None,
            role_name: None,
        },
        before_snapshot: Some(json!({ "id": 1001, "contactPhone": "111", "version": 1 })),
        after_snapshot: Some(json!({ "id": 1001, "contactPhone": "222", "version": 2 })),
        request: RequestContext {
            client_ip: Some("10.0.0.8".to_string()),
        },
        trace_id: new_trace_id(),
        occurred_at: Utc::now(),
    }
}

async fn settled(pipeline: &Pipeline, count: usize, status: ReportStatus) -> Vec<AuditRecord> {
    let store = pipeline.store.clone();
    let reached = common::eventually(|| {
        let store = store.clone();
        async move {
            let records = store.all();
            records.len() == count && records.iter().all(|r| r.report_status == status)
        }
    })
    .await;
    assert!(reached, "records never settled: {:?}", pipeline.store.all());
    pipeline.store.all()
}

fn reconcile_job(pipeline: &Pipeline, config: ReconcileConfig) -> ReconcileJob {
    let store: Arc<dyn AuditStore> = pipeline.store.clone();
    ReconcileJob::new(store, pipeline.delivery.clone(), config)
}

#[tokio::test]
async fn published_event_is_stored_and_delivered() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(3));
    let event = update_event();
    let trace_id = event.trace_id.clone();

    pipeline.bus.publish(event).await;

    let records = settled(&pipeline, 1, ReportStatus::Success).await;
    let record = &records[0];
    assert_eq!(record.retry_count, 0);
    assert!(record.fail_reason.is_none());
    assert!(record.last_report_time.is_some());
    assert_eq!(record.trace_id, trace_id);
    assert_eq!(record.changed_fields, Some(vec!["contactPhone".to_string()]));
    assert_eq!(record.operator_name, "alice");

    assert_eq!(receiver.request_ids(), vec![trace_id]);

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn persistent_failures_stop_at_max_retry() {
    let receiver = StubReceiver::start(vec![
        Reply::Status(500),
        Reply::Status(500),
        Reply::Status(500),
    ])
    .await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));
    let job = reconcile_job(&pipeline, ReconcileConfig::default());

    pipeline.bus.publish(update_event()).await;
    let records = settled(&pipeline, 1, ReportStatus::Failed).await;
    assert_eq!(records[0].retry_count, 1);
    let id = records[0].id;

    let first = job.sweep().await;
    assert_eq!((first.candidates, first.failed), (1, 1));
    assert_eq!(pipeline.store.get(id).unwrap().retry_count, 2);

    let second = job.sweep().await;
    assert_eq!((second.candidates, second.failed), (1, 1));

    let record = pipeline.store.get(id).unwrap();
    assert_eq!(record.report_status, ReportStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.fail_reason.as_deref().is_some_and(|r| r.contains("500")));

    // Exhausted: the job leaves it alone.
    let third = job.sweep().await;
    assert_eq!(third.candidates, 0);

    // Every attempt carried the same idempotency key.
    let ids = receiver.request_ids();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|i| i == &record.trace_id));

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn later_success_keeps_retry_count() {
    let receiver = StubReceiver::start(vec![Reply::Status(502)]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));
    let job = reconcile_job(&pipeline, ReconcileConfig::default());

    pipeline.bus.publish(update_event()).await;
    let records = settled(&pipeline, 1, ReportStatus::Failed).await;
    let id = records[0].id;

    let summary = job.sweep().await;
    assert_eq!(summary.delivered, 1);

    let record = pipeline.store.get(id).unwrap();
    assert_eq!(record.report_status, ReportStatus::Success);
    assert_eq!(record.retry_count, 1);
    assert!(record.fail_reason.is_none());

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn disabled_reporting_marks_records_reported() {
    let receiver = StubReceiver::start(vec![]).await;
    let config = ReportConfig {
        enabled: false,
        ..receiver.report_config()
    };
    let pipeline = common::pipeline(config, common::fast_retry(3));

    pipeline.bus.publish(update_event()).await;

    let records = settled(&pipeline, 1, ReportStatus::Success).await;
    assert_eq!(records[0].retry_count, 0);
    assert!(receiver.received().is_empty());

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn store_failure_is_swallowed() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));
    pipeline.store.set_fail_inserts(true);

    pipeline.bus.publish(update_event()).await;

    assert!(pipeline.workers.shutdown().await);
    assert_eq!(pipeline.store.len(), 0);
    assert!(receiver.received().is_empty());
}

#[tokio::test]
async fn reported_record_is_never_sent_again() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));
    let record = common::sample_record(ReportStatus::Success, 0);
    let id = record.id;
    pipeline.store.seed(record);

    assert_eq!(pipeline.delivery.deliver(id).await, DeliveryResult::AlreadyReported);
    assert!(receiver.received().is_empty());

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));

    assert_eq!(
        pipeline.delivery.deliver(uuid::Uuid::now_v7()).await,
        DeliveryResult::NotFound
    );

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn concurrent_deliveries_of_one_record_send_once() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));
    let record = common::sample_record(ReportStatus::Failed, 1);
    let id = record.id;
    pipeline.store.seed(record);

    let (a, b) = tokio::join!(pipeline.delivery.deliver(id), pipeline.delivery.deliver(id));

    assert!(matches!(a, DeliveryResult::Delivered(_)));
    assert_eq!(b, DeliveryResult::InFlight);
    assert_eq!(receiver.received().len(), 1);
    assert!(!pipeline.delivery.is_in_flight(id));

    pipeline.workers.shutdown().await;
}

#[tokio::test]
async fn burst_of_events_all_arrive() {
    let receiver = StubReceiver::start(vec![]).await;
    let pipeline = common::pipeline(receiver.report_config(), common::fast_retry(1));

    for _ in 0..50 {
        pipeline.bus.publish(update_event()).await;
    }

    let records = settled(&pipeline, 50, ReportStatus::Success).await;
    let mut trace_ids: Vec<_> = records.iter().map(|r| r.trace_id.clone()).collect();
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 50);

    pipeline.workers.shutdown().await;
}
