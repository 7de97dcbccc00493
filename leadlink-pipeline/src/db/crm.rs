//! CRM mirror queries: connections, mirrored leads, sync logs

use leadlink_common::db::models::{CrmConnection, CrmLead, SyncStatus};
use leadlink_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Fields of a mirrored CRM lead as transformed by the puller.
#[derive(Debug, Clone, Default)]
pub struct NewCrmLead {
    pub tenant_id: String,
    pub crm_connection_id: String,
    pub external_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub email_normalized: Option<String>,
    pub phone: Option<String>,
    pub phone_normalized: Option<String>,
    pub address: Option<String>,
    pub address_normalized: Option<String>,
    pub assigned_user_id: Option<String>,
    pub assigned_user_email: Option<String>,
    pub assigned_user_name: Option<String>,
    pub stage: Option<String>,
    pub source: Option<String>,
    pub tags: String,
    pub sync_hash: String,
    pub crm_updated_at: Option<String>,
}

pub async fn list_active_connections(pool: &SqlitePool) -> Result<Vec<CrmConnection>> {
    let connections =
        sqlx::query_as::<_, CrmConnection>("SELECT * FROM crm_connections WHERE active = 1")
            .fetch_all(pool)
            .await?;

    Ok(connections)
}

pub async fn get_connection(pool: &SqlitePool, id: &str) -> Result<Option<CrmConnection>> {
    let connection =
        sqlx::query_as::<_, CrmConnection>("SELECT * FROM crm_connections WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(connection)
}

/// Record the outcome of a sync run on the connection itself.
pub async fn update_connection_sync_state(
    pool: &SqlitePool,
    id: &str,
    last_sync_at: Option<&str>,
    last_sync_status: SyncStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE crm_connections
        SET last_sync_at = COALESCE(?, last_sync_at), last_sync_status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(last_sync_at)
    .bind(last_sync_status.as_str())
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up a mirrored lead by its CRM-side identity.
pub async fn find_lead_by_external_id(
    pool: &SqlitePool,
    crm_connection_id: &str,
    external_id: &str,
) -> Result<Option<CrmLead>> {
    let lead = sqlx::query_as::<_, CrmLead>(
        "SELECT * FROM crm_leads WHERE crm_connection_id = ? AND external_id = ?",
    )
    .bind(crm_connection_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(lead)
}

pub async fn get_lead(pool: &SqlitePool, id: &str) -> Result<Option<CrmLead>> {
    let lead = sqlx::query_as::<_, CrmLead>("SELECT * FROM crm_leads WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(lead)
}

/// Insert a newly mirrored CRM lead; returns its id.
pub async fn insert_lead(pool: &SqlitePool, lead: &NewCrmLead) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO crm_leads
            (id, tenant_id, crm_connection_id, external_id, first_name, last_name,
             email, email_normalized, phone, phone_normalized, address, address_normalized,
             assigned_user_id, assigned_user_email, assigned_user_name,
             stage, source, tags, sync_hash, crm_updated_at, last_synced_at,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&lead.tenant_id)
    .bind(&lead.crm_connection_id)
    .bind(&lead.external_id)
    .bind(&lead.first_name)
    .bind(&lead.last_name)
    .bind(&lead.email)
    .bind(&lead.email_normalized)
    .bind(&lead.phone)
    .bind(&lead.phone_normalized)
    .bind(&lead.address)
    .bind(&lead.address_normalized)
    .bind(&lead.assigned_user_id)
    .bind(&lead.assigned_user_email)
    .bind(&lead.assigned_user_name)
    .bind(&lead.stage)
    .bind(&lead.source)
    .bind(&lead.tags)
    .bind(&lead.sync_hash)
    .bind(&lead.crm_updated_at)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Overwrite a content-changed mirrored lead in place.
pub async fn update_lead(pool: &SqlitePool, id: &str, lead: &NewCrmLead) -> Result<()> {
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        UPDATE crm_leads
        SET first_name = ?, last_name = ?,
            email = ?, email_normalized = ?, phone = ?, phone_normalized = ?,
            address = ?, address_normalized = ?,
            assigned_user_id = ?, assigned_user_email = ?, assigned_user_name = ?,
            stage = ?, source = ?, tags = ?, sync_hash = ?, crm_updated_at = ?,
            last_synced_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&lead.first_name)
    .bind(&lead.last_name)
    .bind(&lead.email)
    .bind(&lead.email_normalized)
    .bind(&lead.phone)
    .bind(&lead.phone_normalized)
    .bind(&lead.address)
    .bind(&lead.address_normalized)
    .bind(&lead.assigned_user_id)
    .bind(&lead.assigned_user_email)
    .bind(&lead.assigned_user_name)
    .bind(&lead.stage)
    .bind(&lead.source)
    .bind(&lead.tags)
    .bind(&lead.sync_hash)
    .bind(&lead.crm_updated_at)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Exact-key candidates by normalized email.
pub async fn find_leads_by_email(
    pool: &SqlitePool,
    tenant_id: &str,
    email_normalized: &str,
) -> Result<Vec<CrmLead>> {
    let leads = sqlx::query_as::<_, CrmLead>(
        "SELECT * FROM crm_leads WHERE tenant_id = ? AND email_normalized = ?",
    )
    .bind(tenant_id)
    .bind(email_normalized)
    .fetch_all(pool)
    .await?;

    Ok(leads)
}

/// Exact-key candidates by normalized phone.
pub async fn find_leads_by_phone(
    pool: &SqlitePool,
    tenant_id: &str,
    phone_normalized: &str,
) -> Result<Vec<CrmLead>> {
    let leads = sqlx::query_as::<_, CrmLead>(
        "SELECT * FROM crm_leads WHERE tenant_id = ? AND phone_normalized = ?",
    )
    .bind(tenant_id)
    .bind(phone_normalized)
    .fetch_all(pool)
    .await?;

    Ok(leads)
}

/// The tenant's addressable corpus for fuzzy scoring.
pub async fn find_leads_with_address(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<CrmLead>> {
    let leads = sqlx::query_as::<_, CrmLead>(
        r#"
        SELECT * FROM crm_leads
        WHERE tenant_id = ? AND address_normalized IS NOT NULL AND address_normalized != ''
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(leads)
}

/// Open a sync log in `running`; returns its id.
pub async fn insert_sync_log(
    pool: &SqlitePool,
    tenant_id: &str,
    crm_connection_id: &str,
    sync_type: &str,
    started_at: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO sync_logs (id, tenant_id, crm_connection_id, sync_type, status, started_at)
        VALUES (?, ?, ?, ?, 'running', ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(crm_connection_id)
    .bind(sync_type)
    .bind(started_at)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Close a sync log with its final counters.
#[allow(clippy::too_many_arguments)]
pub async fn complete_sync_log(
    pool: &SqlitePool,
    id: &str,
    status: SyncStatus,
    completed_at: &str,
    duration_ms: i64,
    records_fetched: i64,
    records_created: i64,
    records_updated: i64,
    errors_json: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_logs
        SET status = ?, completed_at = ?, duration_ms = ?,
            records_fetched = ?, records_created = ?, records_updated = ?, errors = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(completed_at)
    .bind(duration_ms)
    .bind(records_fetched)
    .bind(records_created)
    .bind(records_updated)
    .bind(errors_json)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
