//! Embedding queue worker
//!
//! Drains the `embedding_tasks` queue: claims a batch, makes one provider
//! request for all claimed texts, and writes each vector back onto the
//! owning row. Idempotent per record; failed items revert to `pending`
//! until the attempt ceiling parks them at `failed`.

use sqlx::SqlitePool;
use std::sync::Arc;

use leadlink_common::db::models::EmbeddingTask;
use leadlink_common::embedding::encode_vector;
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::Result;

use crate::db::embedding_queue;
use crate::models::EmbeddingRunStats;
use crate::services::embedding_client::EmbeddingProvider;

pub struct EmbeddingWorker {
    db: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    event_bus: EventBus,
    batch_size: i64,
    max_attempts: i64,
}

impl EmbeddingWorker {
    pub fn new(
        db: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        event_bus: EventBus,
        batch_size: i64,
        max_attempts: i64,
    ) -> Self {
        Self {
            db,
            provider,
            event_bus,
            batch_size,
            max_attempts,
        }
    }

    /// One worker pass: claim, embed, write back. Returns run stats
    /// including the queue depth afterwards.
    pub async fn run_once(&self) -> Result<EmbeddingRunStats> {
        let tasks = embedding_queue::claim(&self.db, self.batch_size, self.max_attempts).await?;

        let mut stats = EmbeddingRunStats {
            claimed: tasks.len() as i64,
            ..EmbeddingRunStats::default()
        };

        if !tasks.is_empty() {
            let texts: Vec<String> = tasks.iter().map(|t| t.text_to_embed.clone()).collect();

            match self.provider.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (task, vector) in tasks.iter().zip(vectors.iter()) {
                        match self.write_back(task, vector).await {
                            Ok(()) => stats.completed += 1,
                            Err(e) => {
                                stats.failed += 1;
                                tracing::warn!(
                                    task_id = %task.id,
                                    record = %format!("{}/{}", task.table_name, task.record_id),
                                    error = %e,
                                    "Embedding write-back failed"
                                );
                                embedding_queue::record_failure(
                                    &self.db,
                                    &task.id,
                                    &e.to_string(),
                                    self.max_attempts,
                                )
                                .await?;
                            }
                        }
                    }
                }
                Err(e) => {
                    // Whole-batch provider failure: every claimed task
                    // reverts and pays one attempt.
                    tracing::error!(
                        claimed = tasks.len(),
                        error = %e,
                        "Embedding provider request failed"
                    );
                    for task in &tasks {
                        embedding_queue::record_failure(
                            &self.db,
                            &task.id,
                            &e.to_string(),
                            self.max_attempts,
                        )
                        .await?;
                    }
                    stats.failed = tasks.len() as i64;
                }
            }
        }

        let (pending_count, failed_count) = embedding_queue::stats(&self.db).await?;
        stats.pending_count = pending_count;
        stats.failed_count = failed_count;

        if stats.claimed > 0 {
            tracing::info!(
                claimed = stats.claimed,
                completed = stats.completed,
                failed = stats.failed,
                pending = stats.pending_count,
                "Embedding worker pass finished"
            );
            self.event_bus.emit_lossy(PipelineEvent::EmbeddingsFlushed {
                completed: stats.completed,
                failed: stats.failed,
                pending_remaining: stats.pending_count,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(stats)
    }

    async fn write_back(&self, task: &EmbeddingTask, vector: &[f32]) -> Result<()> {
        let blob = encode_vector(vector);
        embedding_queue::update_target_embedding(
            &self.db,
            &task.table_name,
            &task.record_id,
            &blob,
            &task.text_to_embed,
        )
        .await?;
        embedding_queue::complete(&self.db, &task.id).await
    }
}
