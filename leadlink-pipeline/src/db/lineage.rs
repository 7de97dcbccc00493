//! Lineage queries (append-only audit trail)

use leadlink_common::db::models::{LineageEntry, LineageOperation};
use leadlink_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Append one lineage record inside the stage's transaction, so the
/// transformation and its audit row commit together.
#[allow(clippy::too_many_arguments)]
pub async fn record(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: &str,
    source_table: &str,
    source_id: &str,
    target_table: &str,
    target_id: &str,
    operation: LineageOperation,
    transformation_type: &str,
    performed_by: &str,
    details: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lineage_entries
            (id, tenant_id, source_table, source_id, target_table, target_id,
             operation, transformation_type, performed_by, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(source_table)
    .bind(source_id)
    .bind(target_table)
    .bind(target_id)
    .bind(operation.as_str())
    .bind(transformation_type)
    .bind(performed_by)
    .bind(details.to_string())
    .bind(super::now_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// All lineage rows pointing at one target record.
pub async fn fetch_for_target(
    pool: &SqlitePool,
    target_table: &str,
    target_id: &str,
) -> Result<Vec<LineageEntry>> {
    let entries = sqlx::query_as::<_, LineageEntry>(
        "SELECT * FROM lineage_entries WHERE target_table = ? AND target_id = ? ORDER BY created_at",
    )
    .bind(target_table)
    .bind(target_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// All lineage rows originating from one source record.
pub async fn fetch_for_source(
    pool: &SqlitePool,
    source_table: &str,
    source_id: &str,
) -> Result<Vec<LineageEntry>> {
    let entries = sqlx::query_as::<_, LineageEntry>(
        "SELECT * FROM lineage_entries WHERE source_table = ? AND source_id = ? ORDER BY created_at",
    )
    .bind(source_table)
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
