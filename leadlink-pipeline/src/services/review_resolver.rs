//! Review candidate resolution
//!
//! Applies operator approve/reject decisions on pending candidates and
//! sweeps expired ones. Approval produces the same terminal state as an
//! auto-match; each decision commits in a single transaction.

use sqlx::{Sqlite, SqlitePool, Transaction};

use leadlink_common::db::models::{CandidateStatus, LineageOperation, MatchCandidate, MatchStatus};
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::{Error, Result};

use crate::db::{leads, lineage, matches};
use crate::services::ingestion_stager::parse_uuid;
use crate::services::matcher::resolve_attribution;

pub struct ReviewResolver {
    db: SqlitePool,
    event_bus: EventBus,
}

impl ReviewResolver {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Approve one pending candidate. Creates the manual match, rejects
    /// its siblings, and settles the canonical lead. Returns the match id.
    pub async fn approve(
        &self,
        candidate_id: &str,
        reviewer_id: &str,
        notes: Option<&str>,
    ) -> Result<String> {
        let candidate = self.load_pending(candidate_id).await?;
        let attribution =
            resolve_attribution(&self.db, &candidate.tenant_id, &candidate.crm_lead_id).await?;

        let reviewed_at = crate::db::now_rfc3339();

        let mut tx = self.db.begin().await?;

        let match_id = matches::insert_match(
            &mut tx,
            &matches::NewLeadMatch {
                tenant_id: candidate.tenant_id.clone(),
                canonical_lead_id: candidate.canonical_lead_id.clone(),
                crm_lead_id: candidate.crm_lead_id.clone(),
                match_type: "manual".to_string(),
                confidence: candidate.confidence_score,
                match_details: candidate.match_reasons.clone(),
                matched_by: "manual".to_string(),
                matched_by_user_id: Some(reviewer_id.to_string()),
                attributed_team_id: attribution.team_id.clone(),
                attributed_agent_id: attribution.agent_id.clone(),
            },
        )
        .await?;

        matches::resolve_candidate(
            &mut tx,
            &candidate.id,
            CandidateStatus::Approved,
            reviewer_id,
            &reviewed_at,
            notes,
            Some(&match_id),
        )
        .await?;

        matches::reject_sibling_candidates(
            &mut tx,
            &candidate.canonical_lead_id,
            &candidate.id,
            reviewer_id,
            &reviewed_at,
        )
        .await?;

        leads::set_match_outcome(
            &mut tx,
            &candidate.canonical_lead_id,
            MatchStatus::Matched,
            Some(candidate.confidence_score),
        )
        .await?;

        lineage::record(
            &mut tx,
            &candidate.tenant_id,
            "canonical_leads",
            &candidate.canonical_lead_id,
            "lead_matches",
            &match_id,
            LineageOperation::Create,
            "manual_review",
            reviewer_id,
            &serde_json::json!({
                "candidate_id": candidate.id,
                "confidence": candidate.confidence_score,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            candidate_id = %candidate.id,
            match_id = %match_id,
            reviewer = %reviewer_id,
            "Candidate approved"
        );

        self.emit_resolved(&candidate, true);

        Ok(match_id)
    }

    /// Reject one pending candidate. The canonical lead recomputes from
    /// whatever candidates remain pending.
    pub async fn reject(
        &self,
        candidate_id: &str,
        reviewer_id: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        let candidate = self.load_pending(candidate_id).await?;
        let reviewed_at = crate::db::now_rfc3339();

        let mut tx = self.db.begin().await?;

        matches::resolve_candidate(
            &mut tx,
            &candidate.id,
            CandidateStatus::Rejected,
            reviewer_id,
            &reviewed_at,
            notes,
            None,
        )
        .await?;

        recompute_after_removal(&mut tx, &candidate.canonical_lead_id).await?;

        tx.commit().await?;

        tracing::info!(
            candidate_id = %candidate.id,
            reviewer = %reviewer_id,
            "Candidate rejected"
        );

        self.emit_resolved(&candidate, false);

        Ok(())
    }

    /// Periodic sweep: expire pending candidates past their TTL and
    /// recompute the affected canonical leads. Returns how many expired.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let overdue = matches::fetch_expirable(&self.db, &crate::db::now_rfc3339()).await?;

        let mut expired = 0u64;
        for candidate in overdue {
            let mut tx = self.db.begin().await?;
            matches::expire_candidate(&mut tx, &candidate.id).await?;
            recompute_after_removal(&mut tx, &candidate.canonical_lead_id).await?;
            tx.commit().await?;
            expired += 1;

            tracing::debug!(
                candidate_id = %candidate.id,
                canonical_lead_id = %candidate.canonical_lead_id,
                "Candidate expired"
            );
        }

        if expired > 0 {
            tracing::info!(count = expired, "Expired overdue match candidates");
        }

        Ok(expired)
    }

    async fn load_pending(&self, candidate_id: &str) -> Result<MatchCandidate> {
        let candidate = matches::get_candidate(&self.db, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Candidate not found: {}", candidate_id)))?;

        if candidate.status != CandidateStatus::Pending.as_str() {
            return Err(Error::Conflict(format!(
                "Candidate {} is {}, not pending",
                candidate_id, candidate.status
            )));
        }

        Ok(candidate)
    }

    fn emit_resolved(&self, candidate: &MatchCandidate, approved: bool) {
        self.event_bus.emit_lossy(PipelineEvent::CandidateResolved {
            tenant_id: parse_uuid(&candidate.tenant_id),
            candidate_id: parse_uuid(&candidate.id),
            canonical_lead_id: parse_uuid(&candidate.canonical_lead_id),
            approved,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// After a candidate leaves the pending set, settle its canonical lead
/// from what remains: none → unmatched, one → review, several → multiple.
/// A lead that already holds an active match is left alone.
async fn recompute_after_removal(
    tx: &mut Transaction<'_, Sqlite>,
    canonical_lead_id: &str,
) -> Result<()> {
    let has_active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lead_matches WHERE canonical_lead_id = ? AND status = 'active'",
    )
    .bind(canonical_lead_id)
    .fetch_one(&mut **tx)
    .await?;
    if has_active > 0 {
        return Ok(());
    }

    let remaining: Vec<(String, f64)> = sqlx::query_as(
        "SELECT id, confidence_score FROM match_candidates WHERE canonical_lead_id = ? AND status = 'pending'",
    )
    .bind(canonical_lead_id)
    .fetch_all(&mut **tx)
    .await?;

    let (status, confidence) = match remaining.len() {
        0 => (MatchStatus::Unmatched, None),
        1 => (MatchStatus::Review, Some(remaining[0].1)),
        _ => (
            MatchStatus::Multiple,
            Some(remaining.iter().map(|(_, c)| *c).fold(f64::NEG_INFINITY, f64::max)),
        ),
    };

    leads::set_match_outcome(tx, canonical_lead_id, status, confidence).await
}
