//! Canonical lead queries

use leadlink_common::db::models::{CanonicalLead, MatchStatus};
use leadlink_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Fields of a canonical lead at insertion time. The transformer fills
/// this from the mapped raw row; `match_status` always starts `pending`.
#[derive(Debug, Clone, Default)]
pub struct NewCanonicalLead {
    pub tenant_id: String,
    pub lead_source_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub email_normalized: Option<String>,
    pub phone: Option<String>,
    pub phone_normalized: Option<String>,
    pub address: Option<String>,
    pub address_normalized: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub lead_type: Option<String>,
    pub source_record_id: Option<String>,
    pub source_created_at: Option<String>,
    pub raw_data: String,
}

/// Insert a canonical lead inside the transformer's transaction.
pub async fn insert(tx: &mut Transaction<'_, Sqlite>, lead: &NewCanonicalLead) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO canonical_leads
            (id, tenant_id, lead_source_id, first_name, last_name,
             email, email_normalized, phone, phone_normalized,
             address, address_normalized, city, state, zip,
             lead_type, source_record_id, source_created_at,
             match_status, raw_data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&lead.tenant_id)
    .bind(&lead.lead_source_id)
    .bind(&lead.first_name)
    .bind(&lead.last_name)
    .bind(&lead.email)
    .bind(&lead.email_normalized)
    .bind(&lead.phone)
    .bind(&lead.phone_normalized)
    .bind(&lead.address)
    .bind(&lead.address_normalized)
    .bind(&lead.city)
    .bind(&lead.state)
    .bind(&lead.zip)
    .bind(&lead.lead_type)
    .bind(&lead.source_record_id)
    .bind(&lead.source_created_at)
    .bind(&lead.raw_data)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<CanonicalLead>> {
    let lead = sqlx::query_as::<_, CanonicalLead>("SELECT * FROM canonical_leads WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(lead)
}

/// Dedup lookup on `(tenant, source, email_normalized)`.
pub async fn find_by_dedup_key(
    pool: &SqlitePool,
    tenant_id: &str,
    lead_source_id: &str,
    email_normalized: &str,
) -> Result<Option<CanonicalLead>> {
    let lead = sqlx::query_as::<_, CanonicalLead>(
        r#"
        SELECT * FROM canonical_leads
        WHERE tenant_id = ? AND lead_source_id = ? AND email_normalized = ?
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(lead_source_id)
    .bind(email_normalized)
    .fetch_optional(pool)
    .await?;

    Ok(lead)
}

/// Atomically claim up to `limit` leads awaiting a matcher decision,
/// oldest first, moving them to the transient `processing` status so no
/// two workers ever hold the same lead.
pub async fn claim_pending_match(pool: &SqlitePool, limit: i64) -> Result<Vec<CanonicalLead>> {
    let now = super::now_rfc3339();
    let claimed = sqlx::query_as::<_, CanonicalLead>(
        r#"
        UPDATE canonical_leads
        SET match_status = 'processing', updated_at = ?
        WHERE id IN (
            SELECT id FROM canonical_leads
            WHERE match_status = 'pending'
            ORDER BY created_at
            LIMIT ?
        )
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(claimed)
}

/// Return a claimed lead to the queue; the next matcher pass retries it.
pub async fn release_to_pending(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE canonical_leads
        SET match_status = 'pending', updated_at = ?
        WHERE id = ? AND match_status = 'processing'
        "#,
    )
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Settle a lead that already holds an active match. Leads already
/// marked `matched` are left untouched, so idempotent re-runs never
/// alter them.
pub async fn ensure_matched_status(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE canonical_leads
        SET match_status = 'matched', updated_at = ?
        WHERE id = ? AND match_status != 'matched'
        "#,
    )
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Return claims stuck in `processing` since before `cutoff` to
/// `pending` (crashed matcher workers).
pub async fn reap_stale(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let affected = sqlx::query(
        r#"
        UPDATE canonical_leads
        SET match_status = 'pending', updated_at = ?
        WHERE match_status = 'processing' AND updated_at < ?
        "#,
    )
    .bind(super::now_rfc3339())
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected)
}

/// Write the matcher's terminal decision for one lead.
pub async fn set_match_outcome(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    status: MatchStatus,
    confidence: Option<f64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE canonical_leads SET match_status = ?, match_confidence = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(confidence)
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
