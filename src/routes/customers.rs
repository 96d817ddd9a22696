use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::audit::AuditContext;
use crate::customers::service;
use crate::error::AppError;
use crate::models::{Customer, CustomerInput};
use crate::state::SharedState;

fn validate(input: &CustomerInput) -> Result<(), AppError> {
    if input.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customerName is required".to_string()));
    }
    if input.contact_name.trim().is_empty() {
        return Err(AppError::BadRequest("contactName is required".to_string()));
    }
    if input.contact_phone.trim().is_empty() {
        return Err(AppError::BadRequest("contactPhone is required".to_string()));
    }
    Ok(())
}

pub async fn create(
    ctx: AuditContext,
    State(state): State<SharedState>,
    Json(req): Json<CustomerInput>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    validate(&req)?;
    let customer = service::create(&state, &ctx, req).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Customer>, AppError> {
    Ok(Json(service::get(&state, id).await?))
}

pub async fn update(
    ctx: AuditContext,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<CustomerInput>,
) -> Result<Json<Customer>, AppError> {
    validate(&req)?;
    let customer = service::update(&state, &ctx, id, req).await?;
    Ok(Json(customer))
}

pub async fn delete(
    ctx: AuditContext,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    service::delete(&state, &ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
