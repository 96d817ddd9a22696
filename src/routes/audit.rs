use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::audit::query::{AuditQueryParams, AuditRecordView};
use crate::audit::store::Page;
use crate::audit::DeliveryResult;
use crate::auth::extractor::AuthUser;
use crate::error::AppError;
use crate::state::SharedState;

pub async fn list(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Page<AuditRecordView>>, AppError> {
    let (filter, page) = params.into_query().map_err(AppError::BadRequest)?;
    let records = state.query.search(&filter, page).await?;
    Ok(Json(records))
}

pub async fn get(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditRecordView>, AppError> {
    let record = state
        .query
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Audit record not found".to_string()))?;
    Ok(Json(record))
}

/// Re-deliver one record now instead of waiting for the next sweep.
pub async fn retry(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditRecordView>, AppError> {
    tracing::info!("User {} requested re-delivery of audit record {id}", auth.user_id());

    match state.delivery.deliver(id).await {
        DeliveryResult::Delivered(record) | DeliveryResult::Failed(record) => {
            Ok(Json(AuditRecordView::from(record)))
        }
        DeliveryResult::AlreadyReported => Err(AppError::Conflict(
            "Audit record has already been reported".to_string(),
        )),
        DeliveryResult::InFlight => Err(AppError::Conflict(
            "Audit record is already being delivered".to_string(),
        )),
        DeliveryResult::NotFound => Err(AppError::NotFound("Audit record not found".to_string())),
        DeliveryResult::StoreError(msg) => Err(AppError::Internal(msg)),
    }
}
