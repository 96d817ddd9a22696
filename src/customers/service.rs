use async_trait::async_trait;
use sqlx::PgPool;

use crate::audit::capture::snapshot;
use crate::audit::{intercept, AuditContext, NoSnapshot, OperationDescriptor, SnapshotLookup};
use crate::db::{self, UnitOfWork};
use crate::error::AppError;
use crate::models::{Customer, CustomerInput, OperationType};
use crate::state::SharedState;

pub const MODULE: &str = "customer";

/// Loads the stored customer before an update or delete.
///
/// Reads through the pool, so callers lock the row in their transaction
/// first; otherwise a concurrent writer could commit between this read and
/// the mutation.
pub struct CustomerLookup {
    pool: PgPool,
}

impl CustomerLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, id: i64) -> Result<Option<serde_json::Value>, String> {
        let customer = db::customers::find_by_id(&self.pool, id)
            .await
            .map_err(|e| format!("Failed to load customer {id}: {e}"))?;
        Ok(customer.as_ref().and_then(snapshot))
    }
}

#[async_trait]
impl SnapshotLookup<(i64, CustomerInput)> for CustomerLookup {
    async fn before_state(
        &self,
        args: &(i64, CustomerInput),
    ) -> Result<Option<serde_json::Value>, String> {
        self.load(args.0).await
    }
}

#[async_trait]
impl SnapshotLookup<i64> for CustomerLookup {
    async fn before_state(&self, id: &i64) -> Result<Option<serde_json::Value>, String> {
        self.load(*id).await
    }
}

fn customer_id(customer: &Customer) -> Option<String> {
    Some(customer.id.to_string())
}

pub async fn create(
    state: &SharedState,
    ctx: &AuditContext,
    input: CustomerInput,
) -> Result<Customer, AppError> {
    let descriptor = OperationDescriptor::<CustomerInput, Customer>::new(MODULE, OperationType::Create)
        .fetch_before_data(false)
        .business_id(customer_id);

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let (conn, outbox) = uow.parts();

    let result = intercept(&descriptor, ctx, outbox, &NoSnapshot, input, |input| async move {
        if db::customers::phone_taken(&mut *conn, &input.contact_phone, None).await? {
            return Err(AppError::Conflict("Contact phone already exists".to_string()));
        }
        let customer = db::customers::create(conn, &input).await?;
        Ok::<_, AppError>(customer)
    })
    .await;

    finish(state, uow, result).await
}

pub async fn update(
    state: &SharedState,
    ctx: &AuditContext,
    id: i64,
    input: CustomerInput,
) -> Result<Customer, AppError> {
    let descriptor =
        OperationDescriptor::<(i64, CustomerInput), Customer>::new(MODULE, OperationType::Update)
            .business_id(customer_id)
            .arg_business_id(|(id, _)| Some(id.to_string()));
    let lookup = CustomerLookup::new(state.pool.clone());

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let (conn, outbox) = uow.parts();
    db::customers::lock_for_update(&mut *conn, id).await?;

    let result = intercept(&descriptor, ctx, outbox, &lookup, (id, input), |(id, input)| async move {
        if db::customers::phone_taken(&mut *conn, &input.contact_phone, Some(id)).await? {
            return Err(AppError::Conflict(
                "Contact phone already used by another customer".to_string(),
            ));
        }
        db::customers::update(conn, id, &input)
            .await?
            .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))
    })
    .await;

    finish(state, uow, result).await
}

pub async fn delete(state: &SharedState, ctx: &AuditContext, id: i64) -> Result<(), AppError> {
    let descriptor = OperationDescriptor::<i64, Customer>::new(MODULE, OperationType::Delete)
        .business_id(customer_id)
        .arg_business_id(|id| Some(id.to_string()));
    let lookup = CustomerLookup::new(state.pool.clone());

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let (conn, outbox) = uow.parts();
    db::customers::lock_for_update(&mut *conn, id).await?;

    let result = intercept(&descriptor, ctx, outbox, &lookup, id, |id| async move {
        db::customers::soft_delete(conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))
    })
    .await;

    finish(state, uow, result).await.map(|_| ())
}

pub async fn get(state: &SharedState, id: i64) -> Result<Customer, AppError> {
    db::customers::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))
}

/// Commit on success so staged audit events are published; roll back and
/// drop them otherwise.
async fn finish<T>(
    state: &SharedState,
    uow: UnitOfWork,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            uow.commit(&state.bus).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::error!("Failed to roll back customer transaction: {rollback_err}");
            }
            Err(e)
        }
    }
}
