//! Ingestion staging and the parse step
//!
//! Staging accepts `(tenant, source, filename, bytes)`, deduplicates on the
//! file's SHA-256, writes the blob, and inserts a `pending` batch row; that
//! row is the parse queue entry. The parse step claims pending batches,
//! splits the CSV per the source config, and stages raw rows with their
//! validation verdicts.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use leadlink_common::db::models::{BatchStatus, IngestionBatch};
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::{Error, Result};

use crate::db::{batches, raw_rows, sources};
use crate::models::{BatchError, BatchLogEntry, ParseStats, SourceConfig, StagingOutcome};
use crate::services::blob_store::BlobStore;
use crate::services::csv_parser::{parse_csv, RowValidator};

/// Batches claimed per parse run.
const PARSE_CLAIM_LIMIT: i64 = 5;

pub struct IngestionStager {
    db: SqlitePool,
    blob_store: BlobStore,
    event_bus: EventBus,
}

impl IngestionStager {
    pub fn new(db: SqlitePool, blob_store: BlobStore, event_bus: EventBus) -> Self {
        Self {
            db,
            blob_store,
            event_bus,
        }
    }

    /// Stage one received CSV. Idempotent on `(tenant, file_hash)`: a
    /// repeat upload returns the existing batch without writing anything.
    pub async fn stage_csv(
        &self,
        tenant_id: &str,
        source_slug: &str,
        filename: &str,
        bytes: &[u8],
        origin: Option<serde_json::Value>,
    ) -> Result<StagingOutcome> {
        let source = sources::get_by_slug(&self.db, tenant_id, source_slug)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Lead source not found: {} (tenant {})",
                    source_slug, tenant_id
                ))
            })?;

        let file_hash = format!("{:x}", Sha256::digest(bytes));

        if let Some(existing) = batches::find_by_hash(&self.db, tenant_id, &file_hash).await? {
            tracing::info!(
                batch_id = %existing.id,
                file_hash = %file_hash,
                "Duplicate upload coalesced onto existing batch"
            );
            return Ok(StagingOutcome {
                batch_id: existing.id,
                deduplicated: true,
            });
        }

        let file_ref = self.blob_store.store_ingestion(filename, bytes)?;

        let origin_value = origin.unwrap_or(serde_json::Value::Null);
        let event = match origin_value.get("channel").and_then(|v| v.as_str()) {
            Some("email") => "email_received",
            _ => "api_upload",
        };
        let log_entry = BatchLogEntry {
            event: event.to_string(),
            at: crate::db::now_rfc3339(),
            details: origin_value,
        };

        let batch = batches::insert(
            &self.db,
            tenant_id,
            &source.id,
            &file_ref,
            filename,
            &file_hash,
            &log_entry,
        )
        .await?;

        tracing::info!(
            batch_id = %batch.id,
            source = %source_slug,
            file = %filename,
            "Staged ingestion batch"
        );

        self.event_bus.emit_lossy(PipelineEvent::BatchStaged {
            tenant_id: parse_uuid(tenant_id),
            batch_id: parse_uuid(&batch.id),
            lead_source_id: parse_uuid(&source.id),
            deduplicated: false,
            timestamp: chrono::Utc::now(),
        });

        Ok(StagingOutcome {
            batch_id: batch.id,
            deduplicated: false,
        })
    }

    /// Claim and parse pending batches. Returns the number processed.
    pub async fn process_pending(&self) -> Result<usize> {
        let claimed = batches::claim(
            &self.db,
            BatchStatus::Pending,
            BatchStatus::Processing,
            PARSE_CLAIM_LIMIT,
        )
        .await?;

        let count = claimed.len();
        for batch in claimed {
            let batch_id = batch.id.clone();
            if let Err(e) = self.parse_batch(&batch).await {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch parse failed");
                batches::fail(
                    &self.db,
                    &batch_id,
                    &BatchError {
                        row_number: None,
                        message: e.to_string(),
                    },
                )
                .await?;
                self.event_bus.emit_lossy(PipelineEvent::BatchFailed {
                    tenant_id: parse_uuid(&batch.tenant_id),
                    batch_id: parse_uuid(&batch_id),
                    error: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        Ok(count)
    }

    /// Parse one claimed batch into raw rows.
    async fn parse_batch(&self, batch: &IngestionBatch) -> Result<ParseStats> {
        let source = sources::get(&self.db, &batch.lead_source_id).await?;
        let config = SourceConfig::from_source(&source)?;
        let validator = RowValidator::new(&config.mapping, &config.validation)?;

        let bytes = self.blob_store.read(&batch.file_ref)?;
        let content = String::from_utf8_lossy(&bytes);

        let parsed = parse_csv(&content, &config.csv)?;

        let mut stats = ParseStats {
            total_rows: parsed.records.len() as i64,
            ..ParseStats::default()
        };

        let mut new_rows = Vec::with_capacity(parsed.records.len());
        for record in &parsed.records {
            let errors = validator.validate(&record.values);
            let is_valid = errors.is_empty();
            if is_valid {
                stats.valid_rows += 1;
            }
            stats.parsed_rows += 1;

            new_rows.push(raw_rows::NewRawRow {
                row_number: record.row_number,
                raw_data: serde_json::to_string(&record.values)?,
                is_valid,
                validation_errors: serde_json::to_string(&errors)?,
            });
        }
        stats.error_rows = stats.total_rows - stats.parsed_rows;

        let mut tx = self.db.begin().await?;
        raw_rows::insert_rows(&mut tx, &batch.id, &new_rows).await?;
        tx.commit().await?;

        batches::finish_parse(
            &self.db,
            &batch.id,
            stats.total_rows,
            stats.parsed_rows,
            stats.valid_rows,
            stats.error_rows,
        )
        .await?;

        batches::append_log(
            &self.db,
            &batch.id,
            &BatchLogEntry {
                event: "parsed".to_string(),
                at: crate::db::now_rfc3339(),
                details: serde_json::json!({
                    "total_rows": stats.total_rows,
                    "valid_rows": stats.valid_rows,
                }),
            },
        )
        .await?;

        tracing::info!(
            batch_id = %batch.id,
            total = stats.total_rows,
            valid = stats.valid_rows,
            "Batch parsed"
        );

        self.event_bus.emit_lossy(PipelineEvent::BatchParsed {
            tenant_id: parse_uuid(&batch.tenant_id),
            batch_id: parse_uuid(&batch.id),
            total_rows: stats.total_rows,
            valid_rows: stats.valid_rows,
            error_rows: stats.error_rows,
            timestamp: chrono::Utc::now(),
        });

        Ok(stats)
    }
}

/// Events carry typed UUIDs; database ids are TEXT. Unparsable ids fall
/// back to nil rather than failing the pipeline over telemetry.
pub(crate) fn parse_uuid(id: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(id).unwrap_or(uuid::Uuid::nil())
}
