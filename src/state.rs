use std::sync::Arc;

use sqlx::PgPool;

use crate::audit::{AuditStore, DeliveryService, EventBus, QueryService, WorkerPool};
use crate::config::Config;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub store: Arc<dyn AuditStore>,
    pub workers: WorkerPool,
    pub bus: EventBus,
    pub delivery: Arc<DeliveryService>,
    pub query: QueryService,
}
