use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AuditRecord, NewAuditRecord, OperationType, ReportStatus};

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(err) => write!(f, "Database Error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

/// A delivery outcome to apply to a record.
///
/// The store owns the resulting state: `Failed` increments `retry_count`,
/// `Delivered` clears `fail_reason` and leaves `retry_count` alone. Neither
/// applies to a record that is already `SUCCESS`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Delivered { at: DateTime<Utc> },
    Failed { reason: String, at: DateTime<Utc> },
}

impl StatusUpdate {
    pub fn target(&self) -> ReportStatus {
        match self {
            StatusUpdate::Delivered { .. } => ReportStatus::Success,
            StatusUpdate::Failed { .. } => ReportStatus::Failed,
        }
    }

    /// Apply this update to an in-memory record, honoring the transition
    /// rules. Returns false when the record is not allowed to change.
    pub fn apply_to(&self, record: &mut AuditRecord) -> bool {
        if !record.report_status.can_transition_to(self.target()) {
            return false;
        }
        match self {
            StatusUpdate::Delivered { at } => {
                record.report_status = ReportStatus::Success;
                record.fail_reason = None;
                record.last_report_time = Some(*at);
            }
            StatusUpdate::Failed { reason, at } => {
                record.report_status = ReportStatus::Failed;
                record.retry_count += 1;
                record.fail_reason = Some(reason.clone());
                record.last_report_time = Some(*at);
            }
        }
        record.update_time = Utc::now();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    OperateTime,
    CreateTime,
    RetryCount,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "operate_time" | "operateTime" => Some(SortField::OperateTime),
            "create_time" | "createTime" => Some(SortField::CreateTime),
            "retry_count" | "retryCount" => Some(SortField::RetryCount),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortField::OperateTime => "operate_time",
            SortField::CreateTime => "create_time",
            SortField::RetryCount => "retry_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for [`AuditStore::query`]. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub module_name: Option<String>,
    pub operation_type: Option<OperationType>,
    pub business_id: Option<String>,
    pub operator_id: Option<i64>,
    /// Case-insensitive substring match.
    pub operator_name: Option<String>,
    pub operate_time_start: Option<DateTime<Utc>>,
    pub operate_time_end: Option<DateTime<Utc>>,
    pub report_status: Option<ReportStatus>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.module_name
            .as_ref()
            .is_none_or(|m| &record.module_name == m)
            && self
                .operation_type
                .is_none_or(|op| record.operation_type == op)
            && self
                .business_id
                .as_ref()
                .is_none_or(|id| record.business_id.as_ref() == Some(id))
            && self.operator_id.is_none_or(|id| record.operator_id == id)
            && self.operator_name.as_ref().is_none_or(|name| {
                record
                    .operator_name
                    .to_lowercase()
                    .contains(&name.to_lowercase())
            })
            && self
                .operate_time_start
                .is_none_or(|start| record.operate_time >= start)
            && self
                .operate_time_end
                .is_none_or(|end| record.operate_time <= end)
            && self
                .report_status
                .is_none_or(|status| record.report_status == status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    pub const MAX_SIZE: i64 = 100;

    pub fn new(page: i64, size: i64) -> Self {
        Self {
            page: page.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// Saturates for pages far past the end; such pages are simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub pages: i64,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, total: i64, request: PageRequest) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + request.size - 1) / request.size
        };
        Self {
            records,
            total,
            page: request.page,
            size: request.size,
            pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            records: self.records.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
            pages: self.pages,
        }
    }
}

/// Durable storage for audit records and their delivery state.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a new record with `report_status = PENDING` and `retry_count = 0`.
    async fn insert(&self, record: &NewAuditRecord) -> Result<AuditRecord, StoreError>;

    /// Apply a delivery outcome. Returns the updated record, or `None` if the
    /// record does not exist or is already `SUCCESS`.
    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<AuditRecord>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError>;

    /// `FAILED` records with `retry_count < max_retry`, oldest first.
    async fn find_failed(&self, max_retry: i32, limit: i64)
    -> Result<Vec<AuditRecord>, StoreError>;

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError>;
}
