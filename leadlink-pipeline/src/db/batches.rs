//! Ingestion batch queries
//!
//! The `status` column doubles as the work queue: `pending` rows feed the
//! parse step, `parsed` rows feed the transformer. Claims flip the status
//! in one atomic UPDATE so concurrent workers never double-process.

use leadlink_common::db::models::{BatchStatus, IngestionBatch};
use leadlink_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{BatchError, BatchLogEntry};

/// Find a batch by its content hash (staging idempotency key).
pub async fn find_by_hash(
    pool: &SqlitePool,
    tenant_id: &str,
    file_hash: &str,
) -> Result<Option<IngestionBatch>> {
    let batch = sqlx::query_as::<_, IngestionBatch>(
        "SELECT * FROM ingestion_batches WHERE tenant_id = ? AND file_hash = ?",
    )
    .bind(tenant_id)
    .bind(file_hash)
    .fetch_optional(pool)
    .await?;

    Ok(batch)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<IngestionBatch>> {
    let batch = sqlx::query_as::<_, IngestionBatch>("SELECT * FROM ingestion_batches WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(batch)
}

/// Insert a new batch in `pending` with an initial log entry.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &SqlitePool,
    tenant_id: &str,
    lead_source_id: &str,
    file_ref: &str,
    file_name: &str,
    file_hash: &str,
    log_entry: &BatchLogEntry,
) -> Result<IngestionBatch> {
    let id = Uuid::new_v4().to_string();
    let now = super::now_rfc3339();
    let log = serde_json::to_string(&vec![log_entry])?;

    sqlx::query(
        r#"
        INSERT INTO ingestion_batches
            (id, tenant_id, lead_source_id, file_ref, file_name, file_hash,
             received_at, status, log, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(lead_source_id)
    .bind(file_ref)
    .bind(file_name)
    .bind(file_hash)
    .bind(&now)
    .bind(&log)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let batch = get(pool, &id)
        .await?
        .expect("batch row must exist after insert");
    Ok(batch)
}

/// Atomically claim up to `limit` batches in `from` status, moving them to
/// `to`. Returns the claimed rows.
pub async fn claim(
    pool: &SqlitePool,
    from: BatchStatus,
    to: BatchStatus,
    limit: i64,
) -> Result<Vec<IngestionBatch>> {
    let now = super::now_rfc3339();
    let claimed = sqlx::query_as::<_, IngestionBatch>(
        r#"
        UPDATE ingestion_batches
        SET status = ?, updated_at = ?
        WHERE id IN (
            SELECT id FROM ingestion_batches
            WHERE status = ?
            ORDER BY created_at
            LIMIT ?
        )
        RETURNING *
        "#,
    )
    .bind(to.as_str())
    .bind(&now)
    .bind(from.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(claimed)
}

/// Advance a batch's status.
pub async fn set_status(pool: &SqlitePool, id: &str, status: BatchStatus) -> Result<()> {
    sqlx::query("UPDATE ingestion_batches SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(super::now_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record end-of-parse counters and advance to `parsed`.
pub async fn finish_parse(
    pool: &SqlitePool,
    id: &str,
    total_rows: i64,
    parsed_rows: i64,
    valid_rows: i64,
    error_rows: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingestion_batches
        SET status = 'parsed', total_rows = ?, parsed_rows = ?, valid_rows = ?,
            error_rows = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(total_rows)
    .bind(parsed_rows)
    .bind(valid_rows)
    .bind(error_rows)
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record end-of-transform counters and the terminal status
/// (`completed` or `partial`).
pub async fn finish_transform(
    pool: &SqlitePool,
    id: &str,
    status: BatchStatus,
    duplicate_rows: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingestion_batches
        SET status = ?, duplicate_rows = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(duplicate_rows)
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a batch `failed`, appending the error to its errors[] column.
pub async fn fail(pool: &SqlitePool, id: &str, error: &BatchError) -> Result<()> {
    append_error(pool, id, error).await?;
    set_status(pool, id, BatchStatus::Failed).await
}

/// Append one entry to the batch's errors[] column.
pub async fn append_error(pool: &SqlitePool, id: &str, error: &BatchError) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT errors FROM ingestion_batches WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    let mut errors: Vec<BatchError> = match current {
        Some(json) if !json.is_empty() => serde_json::from_str(&json).unwrap_or_default(),
        _ => Vec::new(),
    };
    errors.push(error.clone());

    sqlx::query("UPDATE ingestion_batches SET errors = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&errors)?)
        .bind(super::now_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Append one entry to the batch's append-only log column.
pub async fn append_log(pool: &SqlitePool, id: &str, entry: &BatchLogEntry) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT log FROM ingestion_batches WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    let mut log: Vec<BatchLogEntry> = match current {
        Some(json) if !json.is_empty() => serde_json::from_str(&json).unwrap_or_default(),
        _ => Vec::new(),
    };
    log.push(entry.clone());

    sqlx::query("UPDATE ingestion_batches SET log = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&log)?)
        .bind(super::now_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Return stuck in-flight batches (claimed longer ago than `cutoff`) to
/// their queue status so a crashed worker's claims are not lost.
pub async fn reap_stale(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let now = super::now_rfc3339();

    let reparsed = sqlx::query(
        r#"
        UPDATE ingestion_batches
        SET status = 'pending', updated_at = ?
        WHERE status = 'processing' AND updated_at < ?
        "#,
    )
    .bind(&now)
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let retransformed = sqlx::query(
        r#"
        UPDATE ingestion_batches
        SET status = 'parsed', updated_at = ?
        WHERE status = 'transforming' AND updated_at < ?
        "#,
    )
    .bind(&now)
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(reparsed + retransformed)
}
