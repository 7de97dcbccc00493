//! Shared entity models and status enums
//!
//! Row structs mirror the table layouts in `db::init`. Identifiers and
//! timestamps are TEXT in SQLite (UUID strings, RFC 3339); query code binds
//! `Uuid::to_string()` and parses at use sites. Status columns round-trip
//! through the enums below so illegal states fail loudly on read.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{Error, Result};

/// Batch lifecycle. Status advances strictly forward through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Parsed,
    Transforming,
    Completed,
    Failed,
    Partial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Parsed => "parsed",
            BatchStatus::Transforming => "transforming",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "parsed" => Ok(BatchStatus::Parsed),
            "transforming" => Ok(BatchStatus::Transforming),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "partial" => Ok(BatchStatus::Partial),
            other => Err(Error::Internal(format!("Unknown batch status: {}", other))),
        }
    }
}

/// Canonical lead match state.
///
/// `Processing` is the transient claim state while a matcher pass holds
/// the lead; every pass ends in one of the terminal states or releases
/// the lead back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Processing,
    Matched,
    Unmatched,
    Multiple,
    Review,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Processing => "processing",
            MatchStatus::Matched => "matched",
            MatchStatus::Unmatched => "unmatched",
            MatchStatus::Multiple => "multiple",
            MatchStatus::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "processing" => Ok(MatchStatus::Processing),
            "matched" => Ok(MatchStatus::Matched),
            "unmatched" => Ok(MatchStatus::Unmatched),
            "multiple" => Ok(MatchStatus::Multiple),
            "review" => Ok(MatchStatus::Review),
            other => Err(Error::Internal(format!("Unknown match status: {}", other))),
        }
    }
}

/// Match signal kind, in decreasing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    EmailExact,
    PhoneExact,
    AddressFuzzy,
    Manual,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::EmailExact => "email_exact",
            MatchType::PhoneExact => "phone_exact",
            MatchType::AddressFuzzy => "address_fuzzy",
            MatchType::Manual => "manual",
        }
    }

    /// Priority rank for tie-breaking (lower wins).
    pub fn priority(&self) -> u8 {
        match self {
            MatchType::EmailExact => 0,
            MatchType::PhoneExact => 1,
            MatchType::AddressFuzzy => 2,
            MatchType::Manual => 3,
        }
    }
}

/// Committed match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadMatchStatus {
    Active,
    Disputed,
    Invalidated,
}

impl LeadMatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadMatchStatus::Active => "active",
            LeadMatchStatus::Disputed => "disputed",
            LeadMatchStatus::Invalidated => "invalidated",
        }
    }
}

/// Review candidate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Approved => "approved",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Expired => "expired",
        }
    }
}

/// Embedding queue task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Lineage operation kinds (append-only audit trail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageOperation {
    Create,
    Update,
    Merge,
    Split,
    Derive,
}

impl LineageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineageOperation::Create => "create",
            LineageOperation::Update => "update",
            LineageOperation::Merge => "merge",
            LineageOperation::Split => "split",
            LineageOperation::Derive => "derive",
        }
    }
}

/// CRM sync run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::CompletedWithErrors => "completed_with_errors",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Configured feed
#[derive(Debug, Clone, Default, FromRow)]
pub struct LeadSource {
    pub id: String,
    pub tenant_id: String,
    pub slug: String,
    pub display_name: String,
    pub csv_config: String,
    pub field_mapping: String,
    pub validation_rules: String,
    pub created_at: String,
}

/// One received CSV and its processing state
#[derive(Debug, Clone, Default, FromRow)]
pub struct IngestionBatch {
    pub id: String,
    pub tenant_id: String,
    pub lead_source_id: String,
    pub file_ref: String,
    pub file_name: String,
    pub file_hash: String,
    pub received_at: String,
    pub status: String,
    pub total_rows: i64,
    pub parsed_rows: i64,
    pub valid_rows: i64,
    pub duplicate_rows: i64,
    pub error_rows: i64,
    pub log: String,
    pub errors: String,
    pub created_at: String,
    pub updated_at: String,
}

impl IngestionBatch {
    pub fn status(&self) -> Result<BatchStatus> {
        BatchStatus::parse(&self.status)
    }
}

/// One CSV row as staged
#[derive(Debug, Clone, Default, FromRow)]
pub struct RawRow {
    pub id: String,
    pub batch_id: String,
    pub row_number: i64,
    pub raw_data: String,
    pub is_valid: bool,
    pub validation_errors: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub canonical_lead_id: Option<String>,
    pub created_at: String,
}

/// Normalized external lead
#[derive(Debug, Clone, Default, FromRow)]
pub struct CanonicalLead {
    pub id: String,
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
    pub match_status: String,
    pub match_confidence: Option<f64>,
    pub embedding: Option<Vec<u8>>,
    pub embedding_text: Option<String>,
    pub embedded_at: Option<String>,
    pub raw_data: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CanonicalLead {
    pub fn match_status(&self) -> Result<MatchStatus> {
        MatchStatus::parse(&self.match_status)
    }
}

/// Mirrored CRM person
#[derive(Debug, Clone, Default, FromRow)]
pub struct CrmLead {
    pub id: String,
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
    pub embedding: Option<Vec<u8>>,
    pub embedding_text: Option<String>,
    pub embedded_at: Option<String>,
    pub crm_updated_at: Option<String>,
    pub last_synced_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Confirmed attribution between a canonical lead and a CRM lead
#[derive(Debug, Clone, Default, FromRow)]
pub struct LeadMatch {
    pub id: String,
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
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Match awaiting human decision
#[derive(Debug, Clone, Default, FromRow)]
pub struct MatchCandidate {
    pub id: String,
    pub tenant_id: String,
    pub canonical_lead_id: String,
    pub crm_lead_id: String,
    pub match_type: String,
    pub confidence_score: f64,
    pub match_reasons: String,
    pub status: String,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub lead_match_id: Option<String>,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Append-only transformation audit record
#[derive(Debug, Clone, Default, FromRow)]
pub struct LineageEntry {
    pub id: String,
    pub tenant_id: String,
    pub source_table: String,
    pub source_id: String,
    pub target_table: String,
    pub target_id: String,
    pub operation: String,
    pub transformation_type: String,
    pub performed_by: String,
    pub details: String,
    pub created_at: String,
}

/// Embedding queue work item
#[derive(Debug, Clone, Default, FromRow)]
pub struct EmbeddingTask {
    pub id: String,
    pub table_name: String,
    pub record_id: String,
    pub text_to_embed: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One configured CRM account
#[derive(Debug, Clone, Default, FromRow)]
pub struct CrmConnection {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub active: bool,
    pub last_sync_at: Option<String>,
    pub last_sync_status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One CRM sync run record
#[derive(Debug, Clone, Default, FromRow)]
pub struct SyncLog {
    pub id: String,
    pub tenant_id: String,
    pub crm_connection_id: String,
    pub sync_type: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub records_fetched: i64,
    pub records_created: i64,
    pub records_updated: i64,
    pub errors: String,
}

/// Team member who can be attributed on a match
#[derive(Debug, Clone, Default, FromRow)]
pub struct Agent {
    pub id: String,
    pub tenant_id: String,
    pub team_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub crm_user_id: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_round_trip() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Parsed,
            BatchStatus::Transforming,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Partial,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(BatchStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_match_type_priority_order() {
        assert!(MatchType::EmailExact.priority() < MatchType::PhoneExact.priority());
        assert!(MatchType::PhoneExact.priority() < MatchType::AddressFuzzy.priority());
    }

    #[test]
    fn test_status_column_contract() {
        // These strings are what the schema stores; renames here are
        // migrations, not refactors.
        assert_eq!(MatchStatus::parse("multiple").unwrap(), MatchStatus::Multiple);
        assert_eq!(MatchStatus::parse("processing").unwrap(), MatchStatus::Processing);
        assert_eq!(TaskStatus::Processing.as_str(), "processing");
        assert_eq!(LeadMatchStatus::Active.as_str(), "active");
        assert_eq!(CandidateStatus::Expired.as_str(), "expired");
        assert_eq!(SyncStatus::CompletedWithErrors.as_str(), "completed_with_errors");
        assert_eq!(LineageOperation::Derive.as_str(), "derive");
    }
}
