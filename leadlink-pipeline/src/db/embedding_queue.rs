//! Embedding task queue queries
//!
//! The queue is the `embedding_tasks` table: unique on
//! `(table_name, record_id)`, claimed by an atomic status UPDATE, with a
//! reaper returning crashed claims to `pending`.

use leadlink_common::db::models::EmbeddingTask;
use leadlink_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Tables the embedding worker may write vectors back into.
const EMBEDDABLE_TABLES: &[&str] = &["canonical_leads", "crm_leads"];

/// Enqueue a record for embedding.
///
/// Re-enqueuing an already-pending task is a no-op; re-enqueuing a
/// completed, failed, or in-flight one resets it to `pending` with fresh
/// text and zeroed attempts.
pub async fn enqueue(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    text_to_embed: &str,
) -> Result<()> {
    if !EMBEDDABLE_TABLES.contains(&table_name) {
        return Err(Error::InvalidInput(format!(
            "Cannot embed rows of table: {}",
            table_name
        )));
    }

    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO embedding_tasks
            (id, table_name, record_id, text_to_embed, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(table_name, record_id) DO UPDATE SET
            text_to_embed = excluded.text_to_embed,
            status = 'pending',
            attempts = 0,
            last_error = NULL,
            claimed_at = NULL,
            updated_at = excluded.updated_at
        WHERE embedding_tasks.status != 'pending'
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(table_name)
    .bind(record_id)
    .bind(text_to_embed)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically claim up to `batch_size` pending tasks with attempts below
/// the retry ceiling, oldest first.
pub async fn claim(
    pool: &SqlitePool,
    batch_size: i64,
    max_attempts: i64,
) -> Result<Vec<EmbeddingTask>> {
    let now = super::now_rfc3339();

    let claimed = sqlx::query_as::<_, EmbeddingTask>(
        r#"
        UPDATE embedding_tasks
        SET status = 'processing', claimed_at = ?, updated_at = ?
        WHERE id IN (
            SELECT id FROM embedding_tasks
            WHERE status = 'pending' AND attempts < ?
            ORDER BY created_at
            LIMIT ?
        )
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(max_attempts)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    Ok(claimed)
}

/// Mark one task done.
pub async fn complete(pool: &SqlitePool, task_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE embedding_tasks SET status = 'completed', claimed_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(super::now_rfc3339())
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a failed attempt: increment attempts, store the error, and
/// either revert to `pending` or park at `failed` once the ceiling is hit.
pub async fn record_failure(
    pool: &SqlitePool,
    task_id: &str,
    error: &str,
    max_attempts: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE embedding_tasks
        SET attempts = attempts + 1,
            last_error = ?,
            claimed_at = NULL,
            status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'pending' END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(max_attempts)
    .bind(super::now_rfc3339())
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Queue depth after a run: (pending, terminally failed).
pub async fn stats(pool: &SqlitePool) -> Result<(i64, i64)> {
    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_tasks WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
    let failed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_tasks WHERE status = 'failed'")
            .fetch_one(pool)
            .await?;

    Ok((pending, failed))
}

pub async fn get(pool: &SqlitePool, task_id: &str) -> Result<Option<EmbeddingTask>> {
    let task = sqlx::query_as::<_, EmbeddingTask>("SELECT * FROM embedding_tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    Ok(task)
}

pub async fn get_by_record(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
) -> Result<Option<EmbeddingTask>> {
    let task = sqlx::query_as::<_, EmbeddingTask>(
        "SELECT * FROM embedding_tasks WHERE table_name = ? AND record_id = ?",
    )
    .bind(table_name)
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Write the computed vector back onto the owning row.
pub async fn update_target_embedding(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    embedding: &[u8],
    embedding_text: &str,
) -> Result<()> {
    if !EMBEDDABLE_TABLES.contains(&table_name) {
        return Err(Error::InvalidInput(format!(
            "Cannot embed rows of table: {}",
            table_name
        )));
    }

    // table_name is validated against the whitelist above, so the
    // interpolation cannot inject.
    let sql = format!(
        "UPDATE {} SET embedding = ?, embedding_text = ?, embedded_at = ?, updated_at = ? WHERE id = ?",
        table_name
    );

    let now = super::now_rfc3339();
    let affected = sqlx::query(&sql)
        .bind(embedding)
        .bind(embedding_text)
        .bind(&now)
        .bind(&now)
        .bind(record_id)
        .execute(pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(Error::NotFound(format!(
            "Embedding target missing: {}/{}",
            table_name, record_id
        )));
    }

    Ok(())
}

/// Return claims stuck in `processing` since before `cutoff` to `pending`,
/// incrementing attempts. Run on an interval at least twice the longest
/// expected processing time.
pub async fn reap_stale(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let affected = sqlx::query(
        r#"
        UPDATE embedding_tasks
        SET status = 'pending', attempts = attempts + 1, claimed_at = NULL, updated_at = ?
        WHERE status = 'processing' AND claimed_at < ?
        "#,
    )
    .bind(super::now_rfc3339())
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected)
}
