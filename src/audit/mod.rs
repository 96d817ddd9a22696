//! Audit trail pipeline.
//!
//! ```text
//! business call ── intercept ──> Outbox ── UnitOfWork::commit ──> EventBus
//!                                                                   │
//!                         WorkerPool: diff -> AuditStore::insert -> DeliveryService
//!                                                                   │
//!                                     ReportClient (retry/backoff) ─┘
//!
//! ReconcileJob (hourly) ── AuditStore::find_failed ──> DeliveryService
//! ```

pub mod bus;
pub mod capture;
pub mod context;
pub mod delivery;
pub mod diff;
pub mod event;
pub mod outbox;
pub mod pool;
pub mod query;
pub mod reconcile;
pub mod report;
pub mod store;

pub use bus::EventBus;
pub use capture::{intercept, NoSnapshot, OperationDescriptor, SnapshotLookup};
pub use context::{AuditContext, Operator, RequestContext};
pub use delivery::{DeliveryResult, DeliveryService};
pub use event::AuditEvent;
pub use outbox::Outbox;
pub use pool::WorkerPool;
pub use query::QueryService;
pub use reconcile::ReconcileJob;
pub use report::{ReportClient, ReportOutcome};
pub use store::{AuditStore, StatusUpdate, StoreError};
