pub mod audit;
pub mod customers;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Audit records
        .route("/api/v1/audit-records", get(audit::list))
        .route("/api/v1/audit-records/{id}", get(audit::get))
        .route("/api/v1/audit-records/{id}/retry", post(audit::retry))
        // Customers
        .route("/api/v1/customers", post(customers::create))
        .route(
            "/api/v1/customers/{id}",
            get(customers::get)
                .put(customers::update)
                .delete(customers::delete),
        )
}
