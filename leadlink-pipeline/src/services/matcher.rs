//! Matching canonical leads to CRM records
//!
//! For each lead the scorer's signals are tiered: the top result
//! auto-attributes at [`AUTO_MATCH_THRESHOLD`], the review band opens
//! match candidates, and anything below falls out as unmatched. Terminal
//! state for one lead always commits in a single transaction.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use leadlink_common::db::models::{CanonicalLead, LineageOperation, MatchStatus};
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::{Error, Result};

use crate::db::{agents, crm, leads, lineage, matches};
use crate::models::{MatchRunStats, MatchSignal};
use crate::services::ingestion_stager::parse_uuid;
use crate::services::match_scorer;

/// Confidence at or above which the top result attributes automatically.
pub const AUTO_MATCH_THRESHOLD: f64 = 0.90;

/// Floor of the human-review band.
pub const REVIEW_THRESHOLD: f64 = 0.60;

/// Signals below this are rejected outright; the band between this and
/// the review floor is dropped silently. Neither produces a candidate.
pub const REJECT_THRESHOLD: f64 = 0.40;

/// Leads claimed per matcher run.
const MATCH_CLAIM_LIMIT: i64 = 100;

/// Tier assignment for one scored signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Auto,
    Review,
    Discard,
}

impl Tier {
    pub fn classify(confidence: f64) -> Self {
        if confidence >= AUTO_MATCH_THRESHOLD {
            Tier::Auto
        } else if confidence >= REVIEW_THRESHOLD {
            Tier::Review
        } else {
            Tier::Discard
        }
    }
}

/// Attribution resolved from the CRM record's assigned user.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub agent_id: Option<String>,
    pub team_id: Option<String>,
}

/// Denormalize agent and team from the CRM record's assigned user. Used
/// by both the auto-match path and candidate approval.
pub async fn resolve_attribution(
    pool: &SqlitePool,
    tenant_id: &str,
    crm_lead_id: &str,
) -> Result<Attribution> {
    let crm_lead = crm::get_lead(pool, crm_lead_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("CRM lead not found: {}", crm_lead_id)))?;

    if crm_lead.tenant_id != tenant_id {
        // Matches never cross tenants; a mismatch here means the scorer
        // was fed a foreign corpus.
        return Err(Error::Internal(format!(
            "Tenant mismatch resolving attribution for CRM lead {}",
            crm_lead_id
        )));
    }

    let Some(user_id) = crm_lead.assigned_user_id.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(Attribution::default());
    };

    let agent = agents::find_by_crm_user(pool, tenant_id, user_id).await?;
    Ok(match agent {
        Some(agent) => Attribution {
            team_id: agent.team_id.clone(),
            agent_id: Some(agent.id),
        },
        None => Attribution::default(),
    })
}

pub struct Matcher {
    db: SqlitePool,
    event_bus: EventBus,
    candidate_ttl_days: i64,
}

impl Matcher {
    pub fn new(db: SqlitePool, event_bus: EventBus, candidate_ttl_days: i64) -> Self {
        Self {
            db,
            event_bus,
            candidate_ttl_days,
        }
    }

    /// Match all leads currently awaiting a decision.
    ///
    /// Leads are claimed via an atomic status UPDATE, so concurrent
    /// matcher passes never hold the same lead. A failure while applying
    /// one lead's decision is logged against that lead, the claim is
    /// released, and the run continues; a scorer (corpus) failure
    /// releases every remaining claim and aborts the run as
    /// retry-eligible.
    pub async fn run_pending(&self) -> Result<MatchRunStats> {
        let claimed = leads::claim_pending_match(&self.db, MATCH_CLAIM_LIMIT).await?;

        let mut stats = MatchRunStats::default();
        for (i, lead) in claimed.iter().enumerate() {
            stats.processed += 1;

            let signals = match match_scorer::score_lead(&self.db, lead).await {
                Ok(signals) => signals,
                Err(e) => {
                    for unprocessed in &claimed[i..] {
                        leads::release_to_pending(&self.db, &unprocessed.id).await?;
                    }
                    return Err(e);
                }
            };

            match self.apply_decision(lead, &signals).await {
                Ok(MatchStatus::Matched) => stats.auto_matched += 1,
                Ok(MatchStatus::Review) | Ok(MatchStatus::Multiple) => stats.sent_to_review += 1,
                Ok(_) => stats.unmatched += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(
                        canonical_lead_id = %lead.id,
                        error = %e,
                        "Matcher failed for lead"
                    );
                    leads::release_to_pending(&self.db, &lead.id).await?;
                }
            }
        }

        if stats.processed > 0 {
            tracing::info!(
                processed = stats.processed,
                auto = stats.auto_matched,
                review = stats.sent_to_review,
                unmatched = stats.unmatched,
                errors = stats.errors,
                "Matcher run completed"
            );
        }

        Ok(stats)
    }

    /// Match one lead by id (admin kicks and transformer hand-off).
    pub async fn match_lead(&self, canonical_lead_id: &str) -> Result<MatchStatus> {
        let lead = leads::get(&self.db, canonical_lead_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Canonical lead not found: {}", canonical_lead_id))
            })?;

        let signals = match_scorer::score_lead(&self.db, &lead).await?;
        self.apply_decision(&lead, &signals).await
    }

    /// Apply tiering to one lead's scored signals.
    async fn apply_decision(
        &self,
        lead: &CanonicalLead,
        signals: &[MatchSignal],
    ) -> Result<MatchStatus> {
        // A lead with an active match is settled; re-runs are no-ops. A
        // claimed lead still in `processing` settles back to matched.
        if matches::active_match_for_canonical(&self.db, &lead.id)
            .await?
            .is_some()
        {
            tracing::debug!(canonical_lead_id = %lead.id, "Lead already matched, skipping");
            leads::ensure_matched_status(&self.db, &lead.id).await?;
            return Ok(MatchStatus::Matched);
        }

        let top = signals.first();
        let status = match top.map(|s| Tier::classify(s.confidence)) {
            Some(Tier::Auto) => {
                let signal = top.expect("tier derives from top signal");
                self.auto_match(lead, signal).await?
            }
            Some(Tier::Review) => {
                let review_band: Vec<&MatchSignal> = signals
                    .iter()
                    .filter(|s| Tier::classify(s.confidence) == Tier::Review)
                    .collect();
                self.open_review(lead, &review_band).await?
            }
            _ => {
                // No signal above the reject line
                let mut tx = self.db.begin().await?;
                matches::supersede_stale_candidates(&mut tx, &lead.id, &[]).await?;
                leads::set_match_outcome(&mut tx, &lead.id, MatchStatus::Unmatched, None).await?;
                tx.commit().await?;
                MatchStatus::Unmatched
            }
        };

        self.event_bus.emit_lossy(PipelineEvent::LeadMatched {
            tenant_id: parse_uuid(&lead.tenant_id),
            canonical_lead_id: parse_uuid(&lead.id),
            match_status: status.as_str().to_string(),
            confidence: top.map(|s| s.confidence),
            timestamp: Utc::now(),
        });

        Ok(status)
    }

    /// Commit an automatic attribution for the top signal.
    async fn auto_match(&self, lead: &CanonicalLead, signal: &MatchSignal) -> Result<MatchStatus> {
        let attribution =
            resolve_attribution(&self.db, &lead.tenant_id, &signal.crm_lead_id).await?;

        let mut tx = self.db.begin().await?;

        let match_id = matches::insert_match(
            &mut tx,
            &matches::NewLeadMatch {
                tenant_id: lead.tenant_id.clone(),
                canonical_lead_id: lead.id.clone(),
                crm_lead_id: signal.crm_lead_id.clone(),
                match_type: signal.match_type.as_str().to_string(),
                confidence: signal.confidence,
                match_details: signal.details.to_string(),
                matched_by: "system".to_string(),
                matched_by_user_id: None,
                attributed_team_id: attribution.team_id.clone(),
                attributed_agent_id: attribution.agent_id.clone(),
            },
        )
        .await?;

        // Any candidates from an earlier review pass are settled now.
        matches::supersede_stale_candidates(&mut tx, &lead.id, &[]).await?;

        leads::set_match_outcome(&mut tx, &lead.id, MatchStatus::Matched, Some(signal.confidence))
            .await?;

        lineage::record(
            &mut tx,
            &lead.tenant_id,
            "canonical_leads",
            &lead.id,
            "lead_matches",
            &match_id,
            LineageOperation::Create,
            "match",
            "matcher",
            &serde_json::json!({
                "match_type": signal.match_type.as_str(),
                "confidence": signal.confidence,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            canonical_lead_id = %lead.id,
            crm_lead_id = %signal.crm_lead_id,
            match_type = signal.match_type.as_str(),
            confidence = signal.confidence,
            "Lead auto-matched"
        );

        Ok(MatchStatus::Matched)
    }

    /// Upsert review candidates for every signal in the review band and
    /// expire candidates the new scoring no longer supports.
    async fn open_review(
        &self,
        lead: &CanonicalLead,
        review_band: &[&MatchSignal],
    ) -> Result<MatchStatus> {
        let expires_at = (Utc::now() + Duration::days(self.candidate_ttl_days)).to_rfc3339();

        let mut tx = self.db.begin().await?;

        let keep_ids: Vec<String> = review_band
            .iter()
            .map(|s| s.crm_lead_id.clone())
            .collect();

        for signal in review_band {
            matches::upsert_candidate(
                &mut tx,
                &lead.tenant_id,
                &lead.id,
                &signal.crm_lead_id,
                signal.match_type.as_str(),
                signal.confidence,
                &serde_json::json!([signal.details]).to_string(),
                &expires_at,
            )
            .await?;
        }

        matches::supersede_stale_candidates(&mut tx, &lead.id, &keep_ids).await?;

        let pending_count = matches::count_pending_in_tx(&mut tx, &lead.id).await?;
        let status = if pending_count > 1 {
            MatchStatus::Multiple
        } else if pending_count == 1 {
            MatchStatus::Review
        } else {
            // Every reviewer already rejected these pairs
            MatchStatus::Unmatched
        };

        let max_confidence = review_band
            .iter()
            .map(|s| s.confidence)
            .fold(f64::NEG_INFINITY, f64::max);
        let confidence = if status == MatchStatus::Unmatched {
            None
        } else {
            Some(max_confidence)
        };

        leads::set_match_outcome(&mut tx, &lead.id, status, confidence).await?;

        tx.commit().await?;

        tracing::info!(
            canonical_lead_id = %lead.id,
            candidates = pending_count,
            "Lead sent to review"
        );

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_classification() {
        assert_eq!(Tier::classify(1.00), Tier::Auto);
        assert_eq!(Tier::classify(0.90), Tier::Auto);
        assert_eq!(Tier::classify(0.89), Tier::Review);
        assert_eq!(Tier::classify(0.60), Tier::Review);
        assert_eq!(Tier::classify(0.59), Tier::Discard);
        assert_eq!(Tier::classify(0.40), Tier::Discard);
        assert_eq!(Tier::classify(0.10), Tier::Discard);
    }

    #[test]
    fn test_fuzzy_cannot_auto_match_below_point_nine() {
        // The scorer's address floor is 0.60 and confidence equals the raw
        // similarity, so only a similarity above 0.90 could ever reach the
        // auto tier.
        assert_eq!(Tier::classify(super::super::match_scorer::ADDRESS_SIMILARITY_FLOOR + 0.01), Tier::Review);
        assert_eq!(Tier::classify(0.95), Tier::Auto);
    }
}
