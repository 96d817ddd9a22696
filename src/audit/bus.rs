use std::sync::Arc;

use uuid::Uuid;

use crate::models::{NewAuditRecord, OperationType};

use super::delivery::DeliveryService;
use super::diff;
use super::event::AuditEvent;
use super::pool::WorkerPool;
use super::store::AuditStore;

/// Dispatches committed audit events onto the worker pool.
///
/// Each event is turned into a record, persisted as `PENDING`, and handed to
/// the delivery service as a separate pool job. Failures are logged and never
/// reach the publisher.
#[derive(Clone)]
pub struct EventBus {
    pool: WorkerPool,
    store: Arc<dyn AuditStore>,
    delivery: Arc<DeliveryService>,
}

impl EventBus {
    pub fn new(pool: WorkerPool, store: Arc<dyn AuditStore>, delivery: Arc<DeliveryService>) -> Self {
        Self {
            pool,
            store,
            delivery,
        }
    }

    /// Hand an event to the pool. Only call once the producing transaction
    /// has committed; [`crate::db::UnitOfWork::commit`] does this.
    pub async fn publish(&self, event: AuditEvent) {
        let bus = self.clone();
        self.pool
            .submit(Box::pin(async move { bus.handle(event).await }))
            .await;
    }

    async fn handle(&self, event: AuditEvent) {
        tracing::debug!(
            "Handling audit event {} {} (business_id={:?})",
            event.module_name,
            event.operation_type,
            event.business_id
        );

        let record = build_record(event);

        let stored = match self.store.insert(&record).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    "Failed to persist audit record {} ({} {}): {e}",
                    record.id,
                    record.module_name,
                    record.operation_type
                );
                return;
            }
        };

        tracing::info!(
            "Audit record {} saved ({} {})",
            stored.id,
            stored.module_name,
            stored.operation_type
        );

        self.schedule_delivery(stored.id).await;
    }

    async fn schedule_delivery(&self, id: Uuid) {
        let delivery = self.delivery.clone();
        self.pool
            .submit(Box::pin(async move {
                delivery.deliver(id).await;
            }))
            .await;
    }
}

/// Build the record for an event, diffing snapshots for updates.
pub fn build_record(event: AuditEvent) -> NewAuditRecord {
    let changed_fields = match event.operation_type {
        OperationType::Update => Some(diff::diff_fields(
            event.before_snapshot.as_ref(),
            event.after_snapshot.as_ref(),
        )),
        _ => None,
    };

    NewAuditRecord {
        id: Uuid::now_v7(),
        module_name: event.module_name,
        operation_type: event.operation_type,
        business_id: event.business_id,
        operator_id: event.operator.user_id,
        operator_name: event.operator.username,
        operate_time: event.occurred_at,
        before_data: event.before_snapshot,
        after_data: event.after_snapshot,
        changed_fields,
        client_ip: event.request.client_ip,
        trace_id: event.trace_id,
    }
}

