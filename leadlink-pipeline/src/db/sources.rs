//! Lead source queries

use leadlink_common::db::models::LeadSource;
use leadlink_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Look up a source by tenant and slug.
pub async fn get_by_slug(
    pool: &SqlitePool,
    tenant_id: &str,
    slug: &str,
) -> Result<Option<LeadSource>> {
    let source = sqlx::query_as::<_, LeadSource>(
        "SELECT * FROM lead_sources WHERE tenant_id = ? AND slug = ?",
    )
    .bind(tenant_id)
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(source)
}

/// Look up a source by id, failing when absent.
pub async fn get(pool: &SqlitePool, id: &str) -> Result<LeadSource> {
    sqlx::query_as::<_, LeadSource>("SELECT * FROM lead_sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Lead source not found: {}", id)))
}

/// Insert a configured feed. Sources are seeded, rarely mutated.
pub async fn insert(
    pool: &SqlitePool,
    tenant_id: &str,
    slug: &str,
    display_name: &str,
    csv_config: &str,
    field_mapping: &str,
    validation_rules: &str,
) -> Result<LeadSource> {
    let id = Uuid::new_v4().to_string();
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO lead_sources
            (id, tenant_id, slug, display_name, csv_config, field_mapping, validation_rules, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(slug)
    .bind(display_name)
    .bind(csv_config)
    .bind(field_mapping)
    .bind(validation_rules)
    .bind(&now)
    .execute(pool)
    .await?;

    get(pool, &id).await
}
