//! Background worker loops
//!
//! Each pipeline stage polls its own database-backed queue on its own
//! cadence; any number of processes may run the same loops concurrently
//! because every claim — batches, leads awaiting a match, embedding
//! tasks — is an atomic status UPDATE. Failed passes release their
//! claims; the reaper returns claims orphaned by a crashed worker.
//! Cancellation lets the current pass finish, then the loop exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use leadlink_common::Result;

use crate::services::{
    BlobStore, CrmPuller, EmbeddingProvider, EmbeddingWorker, IngestionStager, Matcher,
    ReviewResolver, Transformer,
};
use crate::AppState;

/// Spawn all worker loops. Returns the join handles so the caller can
/// await a clean shutdown after cancelling the token.
pub fn spawn_workers(
    state: &AppState,
    provider: Arc<dyn EmbeddingProvider>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let workers = &state.config.workers;
    let mut handles = Vec::new();

    // Parse loop: pending batches → raw rows
    let stager = Arc::new(IngestionStager::new(
        state.db.clone(),
        BlobStore::new(state.config.storage_root.clone()),
        state.event_bus.clone(),
    ));
    handles.push(spawn_loop(
        "parse",
        Duration::from_secs(workers.parse_interval_secs),
        cancel.clone(),
        move || {
            let stager = stager.clone();
            async move {
                stager.process_pending().await?;
                Ok(())
            }
        },
    ));

    // Transform loop: parsed batches → canonical leads
    let transformer = Arc::new(Transformer::new(state.db.clone(), state.event_bus.clone()));
    handles.push(spawn_loop(
        "transform",
        Duration::from_secs(workers.transform_interval_secs),
        cancel.clone(),
        move || {
            let transformer = transformer.clone();
            async move {
                transformer.process_parsed().await?;
                Ok(())
            }
        },
    ));

    // Match loop: pending leads → matches/candidates, plus candidate TTL
    let matcher = Arc::new(Matcher::new(
        state.db.clone(),
        state.event_bus.clone(),
        workers.candidate_ttl_days,
    ));
    let resolver = Arc::new(ReviewResolver::new(
        state.db.clone(),
        state.event_bus.clone(),
    ));
    handles.push(spawn_loop(
        "match",
        Duration::from_secs(workers.match_interval_secs),
        cancel.clone(),
        move || {
            let matcher = matcher.clone();
            let resolver = resolver.clone();
            async move {
                matcher.run_pending().await?;
                resolver.expire_overdue().await?;
                Ok(())
            }
        },
    ));

    // Embedding loop: drain the task queue
    let embedder = Arc::new(EmbeddingWorker::new(
        state.db.clone(),
        provider,
        state.event_bus.clone(),
        workers.embed_batch_size,
        workers.max_attempts,
    ));
    handles.push(spawn_loop(
        "embed",
        Duration::from_secs(workers.embed_interval_secs),
        cancel.clone(),
        move || {
            let embedder = embedder.clone();
            async move {
                embedder.run_once().await?;
                Ok(())
            }
        },
    ));

    // Reaper loop: return crashed claims to their queues
    let reap_db = state.db.clone();
    let stale_after = workers.reap_interval_secs as i64;
    handles.push(spawn_loop(
        "reap",
        Duration::from_secs(workers.reap_interval_secs),
        cancel.clone(),
        move || {
            let db = reap_db.clone();
            async move {
                let cutoff =
                    (chrono::Utc::now() - chrono::Duration::seconds(stale_after)).to_rfc3339();
                let tasks = crate::db::embedding_queue::reap_stale(&db, &cutoff).await?;
                let batches = crate::db::batches::reap_stale(&db, &cutoff).await?;
                let leads = crate::db::leads::reap_stale(&db, &cutoff).await?;
                if tasks + batches + leads > 0 {
                    tracing::warn!(tasks, batches, leads, "Reaper returned stale claims to queue");
                }
                Ok(())
            }
        },
    ));

    // CRM sync loop: incremental pull per active connection
    let puller = Arc::new(CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.config.crm_timeout(),
    ));
    handles.push(spawn_loop(
        "crm-sync",
        Duration::from_secs(workers.crm_sync_interval_secs),
        cancel.clone(),
        move || {
            let puller = puller.clone();
            async move {
                puller.sync_all(false).await?;
                Ok(())
            }
        },
    ));

    handles
}

/// Generic poll loop: sleep, run one pass, repeat until cancelled. A pass
/// that errors is logged and the loop continues; the backoff between
/// retries is simply the polling period.
fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut pass: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(worker = name, interval_secs = interval.as_secs(), "Worker loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker = name, "Worker loop stopping");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = pass().await {
                        tracing::error!(worker = name, error = %e, "Worker pass failed");
                    }
                }
            }
        }
    })
}
