use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{AuditRecord, ReportStatus};

use super::report::{ReportClient, ReportOutcome};
use super::store::{AuditStore, StatusUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Delivered(AuditRecord),
    Failed(AuditRecord),
    /// The record was `SUCCESS` before this attempt started.
    AlreadyReported,
    /// Another delivery for this record is running in this process.
    InFlight,
    NotFound,
    /// The outcome could not be recorded.
    StoreError(String),
}

/// Runs the report client for stored records and records the outcome.
///
/// Used by the event bus, the reconciliation job and manual retries. A
/// per-record lease keeps them from delivering the same record at the same
/// time.
pub struct DeliveryService {
    store: Arc<dyn AuditStore>,
    client: ReportClient,
    in_flight: DashMap<Uuid, ()>,
}

struct Lease<'a> {
    in_flight: &'a DashMap<Uuid, ()>,
    id: Uuid,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

impl DeliveryService {
    pub fn new(store: Arc<dyn AuditStore>, client: ReportClient) -> Self {
        Self {
            store,
            client,
            in_flight: DashMap::new(),
        }
    }

    pub fn is_in_flight(&self, id: Uuid) -> bool {
        self.in_flight.contains_key(&id)
    }

    fn lease(&self, id: Uuid) -> Option<Lease<'_>> {
        match self.in_flight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Lease {
                    in_flight: &self.in_flight,
                    id,
                })
            }
        }
    }

    pub async fn deliver(&self, id: Uuid) -> DeliveryResult {
        let Some(_lease) = self.lease(id) else {
            tracing::debug!("Audit record {id} already being delivered, skipping");
            return DeliveryResult::InFlight;
        };

        let record = match self.store.find_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!("Audit record {id} not found for delivery");
                return DeliveryResult::NotFound;
            }
            Err(e) => {
                tracing::error!("Failed to load audit record {id} for delivery: {e}");
                return DeliveryResult::StoreError(e.to_string());
            }
        };

        if record.report_status == ReportStatus::Success {
            tracing::info!("Audit record {id} already reported, skipping");
            return DeliveryResult::AlreadyReported;
        }

        let outcome = self.client.report(&record).await;
        let update = match &outcome {
            ReportOutcome::Delivered { .. } | ReportOutcome::Skipped => {
                StatusUpdate::Delivered { at: Utc::now() }
            }
            ReportOutcome::Failed { reason } => StatusUpdate::Failed {
                reason: reason.clone(),
                at: Utc::now(),
            },
        };

        match self.store.update_status(id, &update).await {
            Ok(Some(updated)) if outcome.is_success() => DeliveryResult::Delivered(updated),
            Ok(Some(updated)) => {
                tracing::warn!(
                    "Audit record {id} delivery failed (retry_count={}): {}",
                    updated.retry_count,
                    updated.fail_reason.as_deref().unwrap_or("")
                );
                DeliveryResult::Failed(updated)
            }
            Ok(None) => DeliveryResult::AlreadyReported,
            Err(e) => {
                tracing::error!("Failed to record delivery outcome for audit record {id}: {e}");
                DeliveryResult::StoreError(e.to_string())
            }
        }
    }
}
