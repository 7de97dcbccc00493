//! Match and candidate queries

use leadlink_common::db::models::{CandidateStatus, LeadMatch, MatchCandidate};
use leadlink_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Fields of a committed match at insertion time.
#[derive(Debug, Clone)]
pub struct NewLeadMatch {
    pub tenant_id: String,
    pub canonical_lead_id: String,
    pub crm_lead_id: String,
    pub match_type: String,
    pub confidence: f64,
    pub match_details: String,
    pub matched_by: String,
    pub matched_by_user_id: Option<String>,
    pub attributed_team_id: Option<String>,
    pub attributed_agent_id: Option<String>,
}

/// The single active match for a canonical lead, if any.
pub async fn active_match_for_canonical(
    pool: &SqlitePool,
    canonical_lead_id: &str,
) -> Result<Option<LeadMatch>> {
    let m = sqlx::query_as::<_, LeadMatch>(
        "SELECT * FROM lead_matches WHERE canonical_lead_id = ? AND status = 'active' LIMIT 1",
    )
    .bind(canonical_lead_id)
    .fetch_optional(pool)
    .await?;

    Ok(m)
}

/// Insert a committed match inside the caller's transaction; returns its id.
pub async fn insert_match(tx: &mut Transaction<'_, Sqlite>, m: &NewLeadMatch) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO lead_matches
            (id, tenant_id, canonical_lead_id, crm_lead_id, match_type, confidence,
             match_details, matched_by, matched_by_user_id,
             attributed_team_id, attributed_agent_id, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&m.tenant_id)
    .bind(&m.canonical_lead_id)
    .bind(&m.crm_lead_id)
    .bind(&m.match_type)
    .bind(m.confidence)
    .bind(&m.match_details)
    .bind(&m.matched_by)
    .bind(&m.matched_by_user_id)
    .bind(&m.attributed_team_id)
    .bind(&m.attributed_agent_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn get_match(pool: &SqlitePool, id: &str) -> Result<Option<LeadMatch>> {
    let m = sqlx::query_as::<_, LeadMatch>("SELECT * FROM lead_matches WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(m)
}

/// Upsert a review candidate keyed on `(canonical_lead_id, crm_lead_id)`.
///
/// A fresh pair inserts as `pending`. An existing pending or expired
/// candidate gets the new score and returns to `pending`; reviewer
/// decisions (approved/rejected) are never overwritten by re-scoring.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_candidate(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: &str,
    canonical_lead_id: &str,
    crm_lead_id: &str,
    match_type: &str,
    confidence_score: f64,
    match_reasons: &str,
    expires_at: &str,
) -> Result<()> {
    let now = super::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO match_candidates
            (id, tenant_id, canonical_lead_id, crm_lead_id, match_type,
             confidence_score, match_reasons, status, expires_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        ON CONFLICT(canonical_lead_id, crm_lead_id) DO UPDATE SET
            match_type = excluded.match_type,
            confidence_score = excluded.confidence_score,
            match_reasons = excluded.match_reasons,
            status = CASE WHEN match_candidates.status IN ('pending', 'expired')
                          THEN 'pending' ELSE match_candidates.status END,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(canonical_lead_id)
    .bind(crm_lead_id)
    .bind(match_type)
    .bind(confidence_score)
    .bind(match_reasons)
    .bind(expires_at)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Reject pending candidates of a canonical that the latest scoring no
/// longer returned.
pub async fn supersede_stale_candidates(
    tx: &mut Transaction<'_, Sqlite>,
    canonical_lead_id: &str,
    keep_crm_lead_ids: &[String],
) -> Result<u64> {
    // Dynamic IN list; candidate sets are bounded by the scorer's top-N.
    let placeholders = if keep_crm_lead_ids.is_empty() {
        String::new()
    } else {
        let marks = vec!["?"; keep_crm_lead_ids.len()].join(", ");
        format!("AND crm_lead_id NOT IN ({})", marks)
    };

    let sql = format!(
        r#"
        UPDATE match_candidates
        SET status = 'rejected', review_notes = 'superseded', updated_at = ?
        WHERE canonical_lead_id = ? AND status = 'pending' {}
        "#,
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(super::now_rfc3339())
        .bind(canonical_lead_id);
    for id in keep_crm_lead_ids {
        query = query.bind(id);
    }

    let affected = query.execute(&mut **tx).await?.rows_affected();
    Ok(affected)
}

pub async fn get_candidate(pool: &SqlitePool, id: &str) -> Result<Option<MatchCandidate>> {
    let candidate =
        sqlx::query_as::<_, MatchCandidate>("SELECT * FROM match_candidates WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(candidate)
}

/// Pending candidates for one canonical lead.
pub async fn pending_candidates_for(
    pool: &SqlitePool,
    canonical_lead_id: &str,
) -> Result<Vec<MatchCandidate>> {
    let candidates = sqlx::query_as::<_, MatchCandidate>(
        "SELECT * FROM match_candidates WHERE canonical_lead_id = ? AND status = 'pending'",
    )
    .bind(canonical_lead_id)
    .fetch_all(pool)
    .await?;

    Ok(candidates)
}

/// Count of pending candidates inside a transaction (post-update reads).
pub async fn count_pending_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    canonical_lead_id: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM match_candidates WHERE canonical_lead_id = ? AND status = 'pending'",
    )
    .bind(canonical_lead_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count)
}

/// Record a reviewer decision on one candidate. Guarded on the candidate
/// still being pending inside the transaction, so two racing reviewers
/// cannot both settle the same canonical lead.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_candidate(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    status: CandidateStatus,
    reviewed_by: &str,
    reviewed_at: &str,
    review_notes: Option<&str>,
    lead_match_id: Option<&str>,
) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE match_candidates
        SET status = ?, reviewed_by = ?, reviewed_at = ?,
            review_notes = COALESCE(?, review_notes),
            lead_match_id = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(reviewed_by)
    .bind(reviewed_at)
    .bind(review_notes)
    .bind(lead_match_id)
    .bind(reviewed_at)
    .bind(id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(leadlink_common::Error::Conflict(format!(
            "Candidate {} is no longer pending",
            id
        )));
    }

    Ok(())
}

/// Reject all other pending candidates of the same canonical lead.
pub async fn reject_sibling_candidates(
    tx: &mut Transaction<'_, Sqlite>,
    canonical_lead_id: &str,
    except_candidate_id: &str,
    reviewed_by: &str,
    reviewed_at: &str,
) -> Result<u64> {
    let affected = sqlx::query(
        r#"
        UPDATE match_candidates
        SET status = 'rejected', reviewed_by = ?, reviewed_at = ?,
            review_notes = 'sibling approved', updated_at = ?
        WHERE canonical_lead_id = ? AND status = 'pending' AND id != ?
        "#,
    )
    .bind(reviewed_by)
    .bind(reviewed_at)
    .bind(reviewed_at)
    .bind(canonical_lead_id)
    .bind(except_candidate_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(affected)
}

/// Candidates whose TTL has lapsed, still pending.
pub async fn fetch_expirable(pool: &SqlitePool, now: &str) -> Result<Vec<MatchCandidate>> {
    let candidates = sqlx::query_as::<_, MatchCandidate>(
        "SELECT * FROM match_candidates WHERE status = 'pending' AND expires_at < ?",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(candidates)
}

/// Move one lapsed candidate to `expired` inside the sweep transaction.
pub async fn expire_candidate(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE match_candidates SET status = 'expired', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(super::now_rfc3339())
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
