use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::OperationType;

use super::context::{Operator, RequestContext};

/// A captured mutation on its way to the event bus. Never persisted as-is.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub module_name: String,
    pub operation_type: OperationType,
    pub business_id: Option<String>,
    pub operator: Operator,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: Option<serde_json::Value>,
    pub request: RequestContext,
    /// Idempotency key sent to the receiver as `X-Request-ID`.
    pub trace_id: String,
    pub occurred_at: DateTime<Utc>,
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}
