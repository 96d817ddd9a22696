use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::models::OperationType;

use super::context::AuditContext;
use super::event::{new_trace_id, AuditEvent};
use super::outbox::Outbox;

/// Declares how a business operation is audited.
///
/// `A` is the operation's input and `R` its output. Business ids are pulled
/// from the output first and from the input as a fallback.
pub struct OperationDescriptor<A, R> {
    pub module_name: String,
    pub operation_type: OperationType,
    pub fetch_before_data: bool,
    business_id: Option<fn(&R) -> Option<String>>,
    arg_business_id: Option<fn(&A) -> Option<String>>,
}

impl<A, R> OperationDescriptor<A, R> {
    pub fn new(module_name: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            module_name: module_name.into(),
            operation_type,
            fetch_before_data: operation_type.has_before_state(),
            business_id: None,
            arg_business_id: None,
        }
    }

    pub fn fetch_before_data(mut self, fetch: bool) -> Self {
        self.fetch_before_data = fetch;
        self
    }

    /// Extract the business id from the operation's result.
    pub fn business_id(mut self, extractor: fn(&R) -> Option<String>) -> Self {
        self.business_id = Some(extractor);
        self
    }

    /// Extract the business id from the operation's input.
    pub fn arg_business_id(mut self, extractor: fn(&A) -> Option<String>) -> Self {
        self.arg_business_id = Some(extractor);
        self
    }
}

/// Loads the current state of the entity an operation is about to change.
#[async_trait]
pub trait SnapshotLookup<A: Sync + ?Sized>: Send + Sync {
    async fn before_state(&self, args: &A) -> Result<Option<serde_json::Value>, String>;
}

/// Lookup for operations that never need a before-state.
pub struct NoSnapshot;

#[async_trait]
impl<A: Sync + ?Sized> SnapshotLookup<A> for NoSnapshot {
    async fn before_state(&self, _args: &A) -> Result<Option<serde_json::Value>, String> {
        Ok(None)
    }
}

/// Run `invocation` and stage an [`AuditEvent`] describing it in `outbox`.
///
/// Errors from the invocation are returned unchanged and stage nothing.
/// Problems obtaining snapshots, the business id or the operator degrade to
/// absent values and never fail the call.
pub async fn intercept<A, R, E, L, F, Fut>(
    descriptor: &OperationDescriptor<A, R>,
    ctx: &AuditContext,
    outbox: &mut Outbox,
    lookup: &L,
    args: A,
    invocation: F,
) -> Result<R, E>
where
    A: Sync,
    R: Serialize,
    L: SnapshotLookup<A> + ?Sized,
    F: FnOnce(A) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let before_snapshot =
        if descriptor.fetch_before_data && descriptor.operation_type.has_before_state() {
            match lookup.before_state(&args).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        "Failed to load before-state for {} {}: {e}",
                        descriptor.module_name,
                        descriptor.operation_type
                    );
                    None
                }
            }
        } else {
            None
        };

    let arg_business_id = descriptor.arg_business_id.and_then(|extract| extract(&args));

    let result = invocation(args).await?;

    let after_snapshot = match descriptor.operation_type {
        OperationType::Delete => None,
        _ => snapshot(&result),
    };

    let business_id = match descriptor.business_id.and_then(|extract| extract(&result)) {
        Some(id) => Some(id),
        None => {
            if arg_business_id.is_some() {
                tracing::warn!(
                    "Business id for {} {} taken from the operation input",
                    descriptor.module_name,
                    descriptor.operation_type
                );
            } else {
                tracing::warn!(
                    "Could not determine business id for {} {}",
                    descriptor.module_name,
                    descriptor.operation_type
                );
            }
            arg_business_id
        }
    };

    let event = AuditEvent {
        module_name: descriptor.module_name.clone(),
        operation_type: descriptor.operation_type,
        business_id,
        operator: ctx.operator_or_system(),
        before_snapshot,
        after_snapshot,
        request: ctx.request.clone().unwrap_or_default(),
        trace_id: new_trace_id(),
        occurred_at: Utc::now(),
    };

    tracing::debug!(
        "Captured {} {} (business_id={:?}, trace_id={})",
        event.module_name,
        event.operation_type,
        event.business_id,
        event.trace_id
    );

    outbox.stage(event);
    Ok(result)
}

/// Serialize a value into a snapshot. `null` and serialization failures
/// yield no snapshot.
pub fn snapshot<T: Serialize + ?Sized>(value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Failed to serialize audit snapshot: {e}");
            None
        }
    }
}
