//! Pipeline-local model types
//!
//! Entity row structs live in `leadlink_common::db::models`; this module
//! holds the types that only exist while work is moving through the
//! pipeline: parsed source configuration, mapped rows, scored signals,
//! and per-run statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use leadlink_common::db::models::MatchType;
use leadlink_common::{Error, Result};

/// Canonical target fields a source mapping may populate.
pub const CANONICAL_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "phone",
    "address",
    "city",
    "state",
    "zip",
    "lead_type",
    "source_record_id",
    "source_created_at",
];

/// CSV shape for one configured feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub skip_rows: usize,
}

fn default_delimiter() -> char {
    ','
}
fn default_has_header() -> bool {
    true
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            has_header: default_has_header(),
            date_format: None,
            skip_rows: 0,
        }
    }
}

/// target_field → ordered candidate column names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMapping(pub BTreeMap<String, Vec<String>>);

impl FieldMapping {
    pub fn candidates(&self, target_field: &str) -> &[String] {
        self.0.get(target_field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Row-level validation rules for one feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub email_regex: Option<String>,
}

/// Fully parsed configuration of one lead source row
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub csv: CsvConfig,
    pub mapping: FieldMapping,
    pub validation: ValidationRules,
}

impl SourceConfig {
    /// Parse the JSON config columns of a `lead_sources` row.
    pub fn from_source(source: &leadlink_common::db::models::LeadSource) -> Result<Self> {
        let csv: CsvConfig = serde_json::from_str(&source.csv_config)
            .map_err(|e| Error::Config(format!("Invalid csv_config for {}: {}", source.slug, e)))?;
        let mapping: FieldMapping = serde_json::from_str(&source.field_mapping).map_err(|e| {
            Error::Config(format!("Invalid field_mapping for {}: {}", source.slug, e))
        })?;
        let validation: ValidationRules =
            serde_json::from_str(&source.validation_rules).map_err(|e| {
                Error::Config(format!("Invalid validation_rules for {}: {}", source.slug, e))
            })?;
        Ok(Self {
            csv,
            mapping,
            validation,
        })
    }
}

/// Output of field mapping for one raw row: canonical field → first
/// non-empty candidate value.
#[derive(Debug, Clone, Default)]
pub struct MappedLead {
    pub fields: BTreeMap<String, String>,
}

impl MappedLead {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// One scored signal from the match scorer
#[derive(Debug, Clone)]
pub struct MatchSignal {
    pub crm_lead_id: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub details: serde_json::Value,
}

/// One entry in a batch's append-only log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLogEntry {
    pub event: String,
    pub at: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// One entry in a batch's errors[] column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub row_number: Option<i64>,
    pub message: String,
}

/// Staging result returned to the caller
#[derive(Debug, Clone)]
pub struct StagingOutcome {
    pub batch_id: String,
    pub deduplicated: bool,
}

/// Counters from one parse run over a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseStats {
    pub total_rows: i64,
    pub parsed_rows: i64,
    pub valid_rows: i64,
    pub error_rows: i64,
}

/// Counters from one transform run over a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformStats {
    pub leads_created: i64,
    pub duplicate_rows: i64,
    pub failed_rows: i64,
}

/// Counters from one matcher run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchRunStats {
    pub processed: i64,
    pub auto_matched: i64,
    pub sent_to_review: i64,
    pub unmatched: i64,
    pub errors: i64,
}

/// Counters from one embedding worker run
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingRunStats {
    pub claimed: i64,
    pub completed: i64,
    pub failed: i64,
    /// Queue depth after the run
    pub pending_count: i64,
    /// Terminal failures after the run
    pub failed_count: i64,
}

/// Counters from one CRM sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub records_fetched: i64,
    pub records_created: i64,
    pub records_updated: i64,
    pub errors: Vec<String>,
}
