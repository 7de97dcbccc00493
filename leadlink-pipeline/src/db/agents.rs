//! Team and agent queries (attribution targets)

use leadlink_common::db::models::Agent;
use leadlink_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Resolve the agent mapped to a CRM user within a tenant.
pub async fn find_by_crm_user(
    pool: &SqlitePool,
    tenant_id: &str,
    crm_user_id: &str,
) -> Result<Option<Agent>> {
    let agent =
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE tenant_id = ? AND crm_user_id = ?")
            .bind(tenant_id)
            .bind(crm_user_id)
            .fetch_optional(pool)
            .await?;

    Ok(agent)
}

/// Insert a team; returns its id. Teams are administered externally, so
/// this exists for seeding and tests.
pub async fn insert_team(pool: &SqlitePool, tenant_id: &str, name: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();

    sqlx::query("INSERT INTO teams (id, tenant_id, name, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(tenant_id)
        .bind(name)
        .bind(super::now_rfc3339())
        .execute(pool)
        .await?;

    Ok(id)
}

/// Insert an agent; returns its id.
pub async fn insert_agent(
    pool: &SqlitePool,
    tenant_id: &str,
    team_id: Option<&str>,
    name: &str,
    email: Option<&str>,
    crm_user_id: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO agents (id, tenant_id, team_id, name, email, crm_user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(team_id)
    .bind(name)
    .bind(email)
    .bind(crm_user_id)
    .bind(super::now_rfc3339())
    .execute(pool)
    .await?;

    Ok(id)
}
