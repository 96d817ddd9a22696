pub mod audit;
pub mod auth;
pub mod config;
pub mod customers;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use sqlx::PgPool;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditStore, DeliveryService, EventBus, QueryService, ReportClient, WorkerPool};
use crate::config::Config;
use crate::db::PgAuditStore;
use crate::state::{AppState, SharedState};

/// Wire the audit pipeline and HTTP routes. Must be called inside a Tokio
/// runtime since the worker pool starts immediately.
pub fn build_app(pool: PgPool, config: Config) -> Result<(Router, SharedState), String> {
    let store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::new(pool.clone()));

    let client = ReportClient::new(config.report.clone(), config.retry.clone())?;
    if client.is_enabled() {
        tracing::info!("Audit reporting enabled ({})", config.report.url);
    } else {
        tracing::warn!("Audit reporting disabled or no API key configured; records are marked reported without delivery");
    }

    let delivery = Arc::new(DeliveryService::new(store.clone(), client));
    let workers = WorkerPool::start(&config.pool);
    let bus = EventBus::new(workers.clone(), store.clone(), delivery.clone());
    let query = QueryService::new(store.clone());

    let state: SharedState = Arc::new(AppState {
        pool,
        config,
        store,
        workers,
        bus,
        delivery,
        query,
    });

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state.clone());

    Ok((app, state))
}

async fn health() -> &'static str {
    "ok"
}
