//! Raw row queries
//!
//! Rows are immutable after parse except for the duplicate/canonical
//! back-pointers written by the transformer.

use leadlink_common::db::models::RawRow;
use leadlink_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// One parsed CSV row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewRawRow {
    pub row_number: i64,
    pub raw_data: String,
    pub is_valid: bool,
    pub validation_errors: String,
}

/// Insert all parsed rows of a batch in one transaction.
pub async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    batch_id: &str,
    rows: &[NewRawRow],
) -> Result<()> {
    let now = super::now_rfc3339();

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO raw_rows
                (id, batch_id, row_number, raw_data, is_valid, validation_errors, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(batch_id)
        .bind(row.row_number)
        .bind(&row.raw_data)
        .bind(row.is_valid)
        .bind(&row.validation_errors)
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Valid rows of a batch not yet transformed, in row_number order.
pub async fn fetch_transformable(pool: &SqlitePool, batch_id: &str) -> Result<Vec<RawRow>> {
    let rows = sqlx::query_as::<_, RawRow>(
        r#"
        SELECT * FROM raw_rows
        WHERE batch_id = ? AND is_valid = 1 AND canonical_lead_id IS NULL AND is_duplicate = 0
        ORDER BY row_number
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a row as a duplicate of an existing canonical lead.
pub async fn mark_duplicate(
    tx: &mut Transaction<'_, Sqlite>,
    row_id: &str,
    duplicate_of: &str,
) -> Result<()> {
    sqlx::query("UPDATE raw_rows SET is_duplicate = 1, duplicate_of = ? WHERE id = ?")
        .bind(duplicate_of)
        .bind(row_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Back-link a row to the canonical lead created from it.
pub async fn set_canonical(
    tx: &mut Transaction<'_, Sqlite>,
    row_id: &str,
    canonical_lead_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE raw_rows SET canonical_lead_id = ? WHERE id = ?")
        .bind(canonical_lead_id)
        .bind(row_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// All rows of a batch, in row_number order.
pub async fn fetch_for_batch(pool: &SqlitePool, batch_id: &str) -> Result<Vec<RawRow>> {
    let rows =
        sqlx::query_as::<_, RawRow>("SELECT * FROM raw_rows WHERE batch_id = ? ORDER BY row_number")
            .bind(batch_id)
            .fetch_all(pool)
            .await?;

    Ok(rows)
}

pub async fn count_for_batch(pool: &SqlitePool, batch_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_rows WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}
