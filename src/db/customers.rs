use sqlx::{PgConnection, PgPool};

use crate::models::{Customer, CustomerInput};

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1 AND NOT is_deleted")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Row-lock a live customer for the rest of the transaction. Returns whether
/// it exists.
pub async fn lock_for_update(conn: &mut PgConnection, id: i64) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM customers WHERE id = $1 AND NOT is_deleted FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

/// Whether another live customer already uses this phone number.
pub async fn phone_taken(
    conn: &mut PgConnection,
    phone: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (
             SELECT 1 FROM customers
             WHERE contact_phone = $1 AND NOT is_deleted AND ($2::BIGINT IS NULL OR id <> $2)
         )",
    )
    .bind(phone)
    .bind(exclude_id)
    .fetch_one(conn)
    .await?;
    Ok(row.0)
}

pub async fn create(conn: &mut PgConnection, input: &CustomerInput) -> Result<Customer, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        "INSERT INTO customers (
             customer_name, contact_name, contact_phone, contact_email,
             company_address, customer_source, customer_status, remark
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(&input.customer_name)
    .bind(&input.contact_name)
    .bind(&input.contact_phone)
    .bind(input.contact_email.clone())
    .bind(input.company_address.clone())
    .bind(input.customer_source.clone())
    .bind(input.customer_status.clone())
    .bind(input.remark.clone())
    .fetch_one(conn)
    .await
}

/// Overwrite every editable field and bump the optimistic-lock version.
pub async fn update(
    conn: &mut PgConnection,
    id: i64,
    input: &CustomerInput,
) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        "UPDATE customers
         SET customer_name = $2, contact_name = $3, contact_phone = $4, contact_email = $5,
             company_address = $6, customer_source = $7, customer_status = $8, remark = $9,
             version = version + 1, update_time = now()
         WHERE id = $1 AND NOT is_deleted
         RETURNING *",
    )
    .bind(id)
    .bind(&input.customer_name)
    .bind(&input.contact_name)
    .bind(&input.contact_phone)
    .bind(input.contact_email.clone())
    .bind(input.company_address.clone())
    .bind(input.customer_source.clone())
    .bind(input.customer_status.clone())
    .bind(input.remark.clone())
    .fetch_optional(conn)
    .await
}

/// Soft delete. Returns the deleted row, or `None` if it did not exist.
pub async fn soft_delete(conn: &mut PgConnection, id: i64) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        "UPDATE customers SET is_deleted = TRUE, update_time = now()
         WHERE id = $1 AND NOT is_deleted
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}
