//! Match scoring against the tenant's CRM corpus
//!
//! Emits up to [`MAX_CANDIDATES`] scored signals for one canonical lead.
//! Exact keys (email, phone) resolve through indexed lookups; address
//! similarity runs over the tenant's addressable corpus. The result per
//! `(canonical, crm_lead)` pair is the maximum-confidence signal, ties
//! broken by signal priority.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use leadlink_common::db::models::{CanonicalLead, CrmLead, MatchType};
use leadlink_common::normalize::{phone_match_key, trigram_similarity};
use leadlink_common::Result;

use crate::db::crm;
use crate::models::MatchSignal;

/// Candidates returned per lead.
pub const MAX_CANDIDATES: usize = 5;

/// Confidence for an exact normalized-email match.
pub const EMAIL_EXACT_CONFIDENCE: f64 = 1.00;

/// Confidence for an exact 10-digit phone match.
pub const PHONE_EXACT_CONFIDENCE: f64 = 0.95;

/// Address similarity below this floor is discarded outright.
pub const ADDRESS_SIMILARITY_FLOOR: f64 = 0.60;

/// Score one canonical lead against the tenant's CRM corpus.
pub async fn score_lead(pool: &SqlitePool, lead: &CanonicalLead) -> Result<Vec<MatchSignal>> {
    let mut candidates: Vec<CrmLead> = Vec::new();

    if let Some(email) = non_empty(lead.email_normalized.as_deref()) {
        candidates.extend(crm::find_leads_by_email(pool, &lead.tenant_id, email).await?);
    }

    if let Some(phone) = non_empty(lead.phone_normalized.as_deref()) {
        if phone_match_key(phone).is_some() {
            candidates.extend(crm::find_leads_by_phone(pool, &lead.tenant_id, phone).await?);
        }
    }

    if non_empty(lead.address_normalized.as_deref()).is_some() {
        candidates.extend(crm::find_leads_with_address(pool, &lead.tenant_id).await?);
    }

    Ok(rank_candidates(lead, &candidates))
}

/// Deduplicate, score, and rank a candidate set. Pure; the async wrapper
/// above only gathers the corpus.
pub fn rank_candidates(lead: &CanonicalLead, candidates: &[CrmLead]) -> Vec<MatchSignal> {
    let mut best: BTreeMap<String, MatchSignal> = BTreeMap::new();

    for crm_lead in candidates {
        let Some(signal) = score_pair(lead, crm_lead) else {
            continue;
        };

        match best.get(&crm_lead.id) {
            Some(existing) if !beats(&signal, existing) => {}
            _ => {
                best.insert(crm_lead.id.clone(), signal);
            }
        }
    }

    let mut signals: Vec<MatchSignal> = best.into_values().collect();
    signals.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.match_type.priority().cmp(&b.match_type.priority()))
    });
    signals.truncate(MAX_CANDIDATES);
    signals
}

/// Best signal for one `(canonical, crm_lead)` pair, or None when no
/// signal clears its own threshold.
pub fn score_pair(lead: &CanonicalLead, crm_lead: &CrmLead) -> Option<MatchSignal> {
    let mut signals: Vec<MatchSignal> = Vec::new();

    if let (Some(a), Some(b)) = (
        non_empty(lead.email_normalized.as_deref()),
        non_empty(crm_lead.email_normalized.as_deref()),
    ) {
        if a == b {
            signals.push(MatchSignal {
                crm_lead_id: crm_lead.id.clone(),
                match_type: MatchType::EmailExact,
                confidence: EMAIL_EXACT_CONFIDENCE,
                details: serde_json::json!({ "email": a }),
            });
        }
    }

    if let (Some(a), Some(b)) = (
        lead.phone_normalized.as_deref().and_then(phone_match_key),
        crm_lead.phone_normalized.as_deref().and_then(phone_match_key),
    ) {
        if a == b {
            signals.push(MatchSignal {
                crm_lead_id: crm_lead.id.clone(),
                match_type: MatchType::PhoneExact,
                confidence: PHONE_EXACT_CONFIDENCE,
                details: serde_json::json!({ "phone": a }),
            });
        }
    }

    if let (Some(a), Some(b)) = (
        non_empty(lead.address_normalized.as_deref()),
        non_empty(crm_lead.address_normalized.as_deref()),
    ) {
        let similarity = trigram_similarity(a, b);
        if similarity > ADDRESS_SIMILARITY_FLOOR {
            signals.push(MatchSignal {
                crm_lead_id: crm_lead.id.clone(),
                match_type: MatchType::AddressFuzzy,
                confidence: similarity,
                details: serde_json::json!({
                    "lead_address": a,
                    "crm_address": b,
                    "similarity": similarity,
                }),
            });
        }
    }

    signals.into_iter().reduce(|best, s| {
        if beats(&s, &best) {
            s
        } else {
            best
        }
    })
}

/// Higher confidence wins; equal confidence falls back to signal priority.
fn beats(a: &MatchSignal, b: &MatchSignal) -> bool {
    if a.confidence != b.confidence {
        a.confidence > b.confidence
    } else {
        a.match_type.priority() < b.match_type.priority()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
