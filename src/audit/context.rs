use serde::Serialize;

/// The user performing an audited operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operator {
    pub user_id: i64,
    pub username: String,
    pub role_id: Option<i64>,
    pub role_name: Option<String>,
}

impl Operator {
    pub const SYSTEM_ID: i64 = 0;
    pub const SYSTEM_NAME: &'static str = "SYSTEM";

    /// Synthetic operator used when no identity is available.
    pub fn system() -> Self {
        Self {
            user_id: Self::SYSTEM_ID,
            username: Self::SYSTEM_NAME.to_string(),
            role_id: None,
            role_name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub client_ip: Option<String>,
}

/// Operator and request information passed explicitly to the capture step.
///
/// Either part may be absent: background jobs and tests typically run with
/// [`AuditContext::absent`].
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub operator: Option<Operator>,
    pub request: Option<RequestContext>,
}

impl AuditContext {
    pub fn new(operator: Option<Operator>, request: Option<RequestContext>) -> Self {
        Self { operator, request }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn operator_or_system(&self) -> Operator {
        self.operator.clone().unwrap_or_else(Operator::system)
    }
}
