use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::audit::store::{AuditFilter, AuditStore, Page, PageRequest, StatusUpdate, StoreError};
use crate::models::{AuditRecord, NewAuditRecord, ReportStatus};

pub async fn insert(pool: &PgPool, record: &NewAuditRecord) -> Result<AuditRecord, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(
        "INSERT INTO audit_records (
             id, module_name, operation_type, business_id, operator_id, operator_name,
             operate_time, before_data, after_data, changed_fields, client_ip, trace_id
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         RETURNING *",
    )
    .bind(record.id)
    .bind(&record.module_name)
    .bind(record.operation_type.as_str())
    .bind(record.business_id.clone())
    .bind(record.operator_id)
    .bind(&record.operator_name)
    .bind(record.operate_time)
    .bind(record.before_data.clone())
    .bind(record.after_data.clone())
    .bind(record.changed_fields.clone())
    .bind(record.client_ip.clone())
    .bind(&record.trace_id)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>("SELECT * FROM audit_records WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Mark delivered. SUCCESS rows are left untouched.
pub async fn mark_delivered(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(
        "UPDATE audit_records
         SET report_status = $2, fail_reason = NULL, last_report_time = $3, update_time = now()
         WHERE id = $1 AND report_status <> $2
         RETURNING *",
    )
    .bind(id)
    .bind(ReportStatus::Success.code())
    .bind(at)
    .fetch_optional(pool)
    .await
}

/// Mark failed and bump the retry counter. SUCCESS rows are left untouched.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<Option<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(
        "UPDATE audit_records
         SET report_status = $2,
             retry_count = retry_count + 1,
             fail_reason = $3,
             last_report_time = $4,
             update_time = now()
         WHERE id = $1 AND report_status <> $5
         RETURNING *",
    )
    .bind(id)
    .bind(ReportStatus::Failed.code())
    .bind(reason)
    .bind(at)
    .bind(ReportStatus::Success.code())
    .fetch_optional(pool)
    .await
}

pub async fn find_failed(
    pool: &PgPool,
    max_retry: i32,
    limit: i64,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(
        "SELECT * FROM audit_records
         WHERE report_status = $1 AND retry_count < $2
         ORDER BY operate_time ASC, id ASC
         LIMIT $3",
    )
    .bind(ReportStatus::Failed.code())
    .bind(max_retry)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list(
    pool: &PgPool,
    filter: &AuditFilter,
    page: PageRequest,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM audit_records WHERE TRUE");
    push_filters(&mut query, filter);

    let column = filter.sort_field.column();
    let order = filter.sort_order.keyword();
    query.push(format!(" ORDER BY {column} {order}, id {order}"));
    query.push(" LIMIT ").push_bind(page.size);
    query.push(" OFFSET ").push_bind(page.offset());

    query.build_query_as::<AuditRecord>().fetch_all(pool).await
}

pub async fn count(pool: &PgPool, filter: &AuditFilter) -> Result<i64, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_records WHERE TRUE");
    push_filters(&mut query, filter);
    query.build_query_scalar::<i64>().fetch_one(pool).await
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    if let Some(module_name) = &filter.module_name {
        query.push(" AND module_name = ").push_bind(module_name.clone());
    }
    if let Some(operation_type) = filter.operation_type {
        query
            .push(" AND operation_type = ")
            .push_bind(operation_type.as_str());
    }
    if let Some(business_id) = &filter.business_id {
        query.push(" AND business_id = ").push_bind(business_id.clone());
    }
    if let Some(operator_id) = filter.operator_id {
        query.push(" AND operator_id = ").push_bind(operator_id);
    }
    if let Some(operator_name) = &filter.operator_name {
        query
            .push(" AND operator_name ILIKE ")
            .push_bind(format!("%{}%", escape_like(operator_name)));
    }
    if let Some(start) = filter.operate_time_start {
        query.push(" AND operate_time >= ").push_bind(start);
    }
    if let Some(end) = filter.operate_time_end {
        query.push(" AND operate_time <= ").push_bind(end);
    }
    if let Some(status) = filter.report_status {
        query.push(" AND report_status = ").push_bind(status.code());
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// [`AuditStore`] backed by the `audit_records` table.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, record: &NewAuditRecord) -> Result<AuditRecord, StoreError> {
        Ok(insert(&self.pool, record).await?)
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let updated = match update {
            StatusUpdate::Delivered { at } => mark_delivered(&self.pool, id, *at).await?,
            StatusUpdate::Failed { reason, at } => mark_failed(&self.pool, id, reason, *at).await?,
        };
        Ok(updated)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn find_failed(
        &self,
        max_retry: i32,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(find_failed(&self.pool, max_retry, limit).await?)
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError> {
        let records = list(&self.pool, filter, page).await?;
        let total = count(&self.pool, filter).await?;
        Ok(Page::new(records, total, page))
    }
}
