use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AuditRecord, OperationType, ReportStatus};

use super::store::{AuditFilter, AuditStore, Page, PageRequest, SortField, SortOrder, StoreError};

/// Raw query parameters as accepted by the read API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQueryParams {
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub module_name: Option<String>,
    pub operation_type: Option<String>,
    pub business_id: Option<String>,
    pub operator_id: Option<i64>,
    pub operator_name: Option<String>,
    pub operate_time_start: Option<DateTime<Utc>>,
    pub operate_time_end: Option<DateTime<Utc>>,
    pub report_status: Option<i16>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
}

impl AuditQueryParams {
    /// Validate into a filter and page. Blank strings are treated as unset.
    pub fn into_query(self) -> Result<(AuditFilter, PageRequest), String> {
        let page = PageRequest::new(self.page.unwrap_or(1), self.size.unwrap_or(10));

        let operation_type = non_blank(self.operation_type)
            .map(|raw| raw.parse::<OperationType>().map_err(|e| e.to_string()))
            .transpose()?;

        let report_status = self
            .report_status
            .map(|code| ReportStatus::try_from(code).map_err(|e| e.to_string()))
            .transpose()?;

        let sort_field = match non_blank(self.sort_field) {
            Some(raw) => SortField::parse(&raw).ok_or_else(|| format!("unknown sort field '{raw}'"))?,
            None => SortField::default(),
        };

        let sort_order = match non_blank(self.sort_order) {
            Some(raw) => SortOrder::parse(&raw).ok_or_else(|| format!("unknown sort order '{raw}'"))?,
            None => SortOrder::default(),
        };

        if let (Some(start), Some(end)) = (self.operate_time_start, self.operate_time_end) {
            if start > end {
                return Err("operate_time_start is after operate_time_end".to_string());
            }
        }

        let filter = AuditFilter {
            module_name: non_blank(self.module_name),
            operation_type,
            business_id: non_blank(self.business_id),
            operator_id: self.operator_id,
            operator_name: non_blank(self.operator_name),
            operate_time_start: self.operate_time_start,
            operate_time_end: self.operate_time_end,
            report_status,
            sort_field,
            sort_order,
        };

        Ok((filter, page))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Record as exposed by the read API.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecordView {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub report_status_desc: &'static str,
}

impl From<AuditRecord> for AuditRecordView {
    fn from(record: AuditRecord) -> Self {
        let report_status_desc = record.report_status.description();
        Self {
            record,
            report_status_desc,
        }
    }
}

/// Read-only access to stored audit records.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn AuditStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<AuditRecordView>, StoreError> {
        Ok(self.store.find_by_id(id).await?.map(AuditRecordView::from))
    }

    pub async fn search(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecordView>, StoreError> {
        Ok(self.store.query(filter, page).await?.map(AuditRecordView::from))
    }
}
