use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{stream, FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ReconcileConfig;

use super::delivery::{DeliveryResult, DeliveryService};
use super::store::AuditStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Periodically re-drives records left in `FAILED` state.
pub struct ReconcileJob {
    store: Arc<dyn AuditStore>,
    delivery: Arc<DeliveryService>,
    config: ReconcileConfig,
}

impl ReconcileJob {
    pub fn new(
        store: Arc<dyn AuditStore>,
        delivery: Arc<DeliveryService>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            config,
        }
    }

    /// Run a sweep every `interval` until shutdown is signaled.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; sweeps start one interval in.
            ticker.tick().await;

            tracing::info!(
                "Audit reconciliation job started (every {:?})",
                self.config.interval
            );

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }

                // Deliveries abandoned here stay FAILED and are picked up by
                // the next run.
                tokio::select! {
                    _ = self.sweep() => {}
                    _ = shutdown.changed() => {
                        tracing::info!("Shutdown requested, abandoning reconciliation sweep");
                        break;
                    }
                }
            }

            tracing::info!("Audit reconciliation job stopped");
        })
    }

    /// Re-deliver one batch of failed records.
    pub async fn sweep(&self) -> SweepSummary {
        tracing::info!("Starting audit reconciliation sweep");

        let records = match self
            .store
            .find_failed(self.config.max_retry, self.config.batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Failed to load failed audit records: {e}");
                return SweepSummary::default();
            }
        };

        let mut summary = SweepSummary {
            candidates: records.len(),
            ..SweepSummary::default()
        };

        let results = stream::iter(records)
            .map(|record| {
                let delivery = self.delivery.clone();
                async move {
                    AssertUnwindSafe(delivery.deliver(record.id))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            tracing::error!("Delivery of audit record {} panicked", record.id);
                            DeliveryResult::StoreError("delivery panicked".to_string())
                        })
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                DeliveryResult::Delivered(_) => summary.delivered += 1,
                DeliveryResult::Failed(_) | DeliveryResult::StoreError(_) => summary.failed += 1,
                DeliveryResult::AlreadyReported
                | DeliveryResult::InFlight
                | DeliveryResult::NotFound => summary.skipped += 1,
            }
        }

        tracing::info!(
            "Audit reconciliation sweep finished: {} candidates, {} delivered, {} failed, {} skipped",
            summary.candidates,
            summary.delivered,
            summary.failed,
            summary.skipped
        );

        summary
    }
}
