use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }

    /// Whether the operation mutates an existing row, i.e. has a before-state.
    pub fn has_before_state(&self) -> bool {
        matches!(self, OperationType::Update | OperationType::Delete)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(OperationType::Create),
            "UPDATE" => Ok(OperationType::Update),
            "DELETE" => Ok(OperationType::Delete),
            _ => Err(UnknownVariant(format!("unknown operation type '{s}'"))),
        }
    }
}

impl TryFrom<String> for OperationType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Delivery state of a record. Stored as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum ReportStatus {
    Pending,
    Success,
    Failed,
}

impl ReportStatus {
    pub fn code(&self) -> i16 {
        match self {
            ReportStatus::Pending => 0,
            ReportStatus::Success => 1,
            ReportStatus::Failed => 2,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Success => "reported",
            ReportStatus::Failed => "failed",
        }
    }

    /// Allowed transitions: PENDING->SUCCESS, PENDING->FAILED, FAILED->SUCCESS,
    /// FAILED->FAILED. SUCCESS is terminal.
    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        match (self, next) {
            (ReportStatus::Success, _) => false,
            (_, ReportStatus::Pending) => false,
            _ => true,
        }
    }
}

impl From<ReportStatus> for i16 {
    fn from(status: ReportStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i16> for ReportStatus {
    type Error = UnknownVariant;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ReportStatus::Pending),
            1 => Ok(ReportStatus::Success),
            2 => Ok(ReportStatus::Failed),
            other => Err(UnknownVariant(format!("unknown report status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownVariant(pub String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub module_name: String,
    #[sqlx(try_from = "String")]
    pub operation_type: OperationType,
    pub business_id: Option<String>,
    pub operator_id: i64,
    pub operator_name: String,
    pub operate_time: DateTime<Utc>,
    pub before_data: Option<serde_json::Value>,
    pub after_data: Option<serde_json::Value>,
    pub changed_fields: Option<Vec<String>>,
    #[sqlx(try_from = "i16")]
    pub report_status: ReportStatus,
    pub retry_count: i32,
    pub fail_reason: Option<String>,
    pub last_report_time: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub trace_id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// A record as built by the event bus, before the store assigns status
/// bookkeeping.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub id: Uuid,
    pub module_name: String,
    pub operation_type: OperationType,
    pub business_id: Option<String>,
    pub operator_id: i64,
    pub operator_name: String,
    pub operate_time: DateTime<Utc>,
    pub before_data: Option<serde_json::Value>,
    pub after_data: Option<serde_json::Value>,
    pub changed_fields: Option<Vec<String>>,
    pub client_ip: Option<String>,
    pub trace_id: String,
}
