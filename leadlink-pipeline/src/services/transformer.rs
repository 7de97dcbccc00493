//! Transformation of staged raw rows into canonical leads
//!
//! Consumes `parsed` batches: applies the source's field mapping,
//! deduplicates within `(tenant, source, email)`, inserts canonical leads
//! in `pending`, back-links the raw rows, records lineage, and enqueues
//! each new lead for embedding. Rows transform in `row_number` order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use leadlink_common::db::models::{BatchStatus, IngestionBatch, LineageOperation};
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::normalize;
use leadlink_common::Result;

use crate::db::{batches, embedding_queue, leads, lineage, raw_rows, sources};
use crate::models::{BatchError, FieldMapping, MappedLead, SourceConfig, TransformStats};
use crate::services::ingestion_stager::parse_uuid;

/// Batches claimed per transform run.
const TRANSFORM_CLAIM_LIMIT: i64 = 5;

/// Fallback date patterns tried after the source's own format.
const FALLBACK_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d"];

pub struct Transformer {
    db: SqlitePool,
    event_bus: EventBus,
}

impl Transformer {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Claim and transform parsed batches. Returns the ids of all newly
    /// created canonical leads, for hand-off to the matcher.
    pub async fn process_parsed(&self) -> Result<Vec<String>> {
        let claimed = batches::claim(
            &self.db,
            BatchStatus::Parsed,
            BatchStatus::Transforming,
            TRANSFORM_CLAIM_LIMIT,
        )
        .await?;

        let mut all_new_leads = Vec::new();
        for batch in claimed {
            match self.transform_batch(&batch).await {
                Ok(mut new_leads) => all_new_leads.append(&mut new_leads),
                Err(e) => {
                    tracing::error!(batch_id = %batch.id, error = %e, "Batch transform failed");
                    batches::fail(
                        &self.db,
                        &batch.id,
                        &BatchError {
                            row_number: None,
                            message: e.to_string(),
                        },
                    )
                    .await?;
                    self.event_bus.emit_lossy(PipelineEvent::BatchFailed {
                        tenant_id: parse_uuid(&batch.tenant_id),
                        batch_id: parse_uuid(&batch.id),
                        error: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }

        Ok(all_new_leads)
    }

    /// Transform one claimed batch. Each row commits independently so one
    /// bad row never takes down its batch.
    async fn transform_batch(&self, batch: &IngestionBatch) -> Result<Vec<String>> {
        let source = sources::get(&self.db, &batch.lead_source_id).await?;
        let config = SourceConfig::from_source(&source)?;

        let rows = raw_rows::fetch_transformable(&self.db, &batch.id).await?;

        let mut stats = TransformStats::default();
        let mut new_leads = Vec::new();

        for row in rows {
            match self.transform_row(batch, &config, &row).await {
                Ok(RowOutcome::Created(lead_id)) => {
                    stats.leads_created += 1;
                    new_leads.push(lead_id);
                }
                Ok(RowOutcome::Duplicate) => stats.duplicate_rows += 1,
                Err(e) => {
                    stats.failed_rows += 1;
                    tracing::warn!(
                        batch_id = %batch.id,
                        row_number = row.row_number,
                        error = %e,
                        "Row transform failed"
                    );
                    batches::append_error(
                        &self.db,
                        &batch.id,
                        &BatchError {
                            row_number: Some(row.row_number),
                            message: e.to_string(),
                        },
                    )
                    .await?;
                }
            }
        }

        let status = if stats.failed_rows > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Completed
        };
        batches::finish_transform(&self.db, &batch.id, status, stats.duplicate_rows).await?;

        batches::append_log(
            &self.db,
            &batch.id,
            &crate::models::BatchLogEntry {
                event: "transformed".to_string(),
                at: crate::db::now_rfc3339(),
                details: serde_json::json!({
                    "leads_created": stats.leads_created,
                    "duplicate_rows": stats.duplicate_rows,
                    "failed_rows": stats.failed_rows,
                }),
            },
        )
        .await?;

        tracing::info!(
            batch_id = %batch.id,
            created = stats.leads_created,
            duplicates = stats.duplicate_rows,
            failed = stats.failed_rows,
            "Batch transformed"
        );

        self.event_bus.emit_lossy(PipelineEvent::BatchTransformed {
            tenant_id: parse_uuid(&batch.tenant_id),
            batch_id: parse_uuid(&batch.id),
            leads_created: stats.leads_created,
            duplicate_rows: stats.duplicate_rows,
            timestamp: chrono::Utc::now(),
        });

        Ok(new_leads)
    }

    async fn transform_row(
        &self,
        batch: &IngestionBatch,
        config: &SourceConfig,
        row: &leadlink_common::db::models::RawRow,
    ) -> Result<RowOutcome> {
        let values: BTreeMap<String, String> = serde_json::from_str(&row.raw_data)?;
        let mapped = map_fields(&values, &config.mapping);

        let email = mapped.get("email").map(str::to_string);
        let email_normalized = email.as_deref().and_then(normalize::normalize_email);

        // Dedup within (tenant, source, email)
        if let Some(key) = &email_normalized {
            if let Some(existing) =
                leads::find_by_dedup_key(&self.db, &batch.tenant_id, &batch.lead_source_id, key)
                    .await?
            {
                let mut tx = self.db.begin().await?;
                raw_rows::mark_duplicate(&mut tx, &row.id, &existing.id).await?;
                tx.commit().await?;

                tracing::debug!(
                    row_number = row.row_number,
                    canonical_lead_id = %existing.id,
                    "Row deduplicated against existing canonical lead"
                );
                return Ok(RowOutcome::Duplicate);
            }
        }

        let phone = mapped.get("phone").map(str::to_string);
        let phone_normalized = phone.as_deref().and_then(normalize::normalize_phone);
        let address = mapped.get("address").map(str::to_string);
        let address_normalized = address.as_deref().and_then(normalize::normalize_address);

        let source_created_at = mapped
            .get("source_created_at")
            .and_then(|raw| parse_source_date(raw, config.csv.date_format.as_deref()))
            .map(|dt| dt.to_rfc3339());

        let new_lead = leads::NewCanonicalLead {
            tenant_id: batch.tenant_id.clone(),
            lead_source_id: batch.lead_source_id.clone(),
            first_name: mapped.get("first_name").map(str::to_string),
            last_name: mapped.get("last_name").map(str::to_string),
            email,
            email_normalized,
            phone,
            phone_normalized,
            address,
            address_normalized,
            city: mapped.get("city").map(str::to_string),
            state: mapped.get("state").map(str::to_string),
            zip: mapped.get("zip").map(str::to_string),
            lead_type: mapped.get("lead_type").map(str::to_string),
            source_record_id: mapped.get("source_record_id").map(str::to_string),
            source_created_at,
            raw_data: row.raw_data.clone(),
        };

        let mut tx = self.db.begin().await?;
        let lead_id = leads::insert(&mut tx, &new_lead).await?;
        raw_rows::set_canonical(&mut tx, &row.id, &lead_id).await?;
        lineage::record(
            &mut tx,
            &batch.tenant_id,
            "raw_rows",
            &row.id,
            "canonical_leads",
            &lead_id,
            LineageOperation::Create,
            "normalize",
            "transformer",
            &serde_json::json!({ "batch_id": batch.id, "row_number": row.row_number }),
        )
        .await?;
        tx.commit().await?;

        // Embedding is asynchronous; matching never waits on it.
        let text = compose_embedding_text(&new_lead);
        if !text.is_empty() {
            embedding_queue::enqueue(&self.db, "canonical_leads", &lead_id, &text).await?;
        }

        Ok(RowOutcome::Created(lead_id))
    }
}

enum RowOutcome {
    Created(String),
    Duplicate,
}

/// For each canonical field, the first candidate column with a non-empty
/// trimmed value wins.
pub fn map_fields(values: &BTreeMap<String, String>, mapping: &FieldMapping) -> MappedLead {
    let mut mapped = MappedLead::default();

    for field in crate::models::CANONICAL_FIELDS {
        for column in mapping.candidates(field) {
            if let Some(value) = values.get(column) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    mapped.fields.insert(field.to_string(), trimmed.to_string());
                    break;
                }
            }
        }
    }

    mapped
}

/// Parse a source timestamp: ISO first, then the source's configured
/// format, then the common US patterns. Unparsable dates are None, never a
/// row-level failure.
pub fn parse_source_date(raw: &str, date_format: Option<&str>) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }

    let mut formats: Vec<&str> = Vec::new();
    if let Some(f) = date_format {
        formats.push(f);
    }
    formats.extend_from_slice(FALLBACK_DATE_FORMATS);

    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let dt = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    None
}

/// Deterministic embedding input: non-empty attributes joined in a fixed
/// order.
pub fn compose_embedding_text(lead: &leads::NewCanonicalLead) -> String {
    let parts: Vec<&str> = [
        lead.first_name.as_deref(),
        lead.last_name.as_deref(),
        lead.email.as_deref(),
        lead.phone.as_deref(),
        lead.address.as_deref(),
        lead.city.as_deref(),
        lead.state.as_deref(),
        lead.zip.as_deref(),
        lead.lead_type.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|s| !s.trim().is_empty())
    .collect();

    parts.join(" | ")
}
