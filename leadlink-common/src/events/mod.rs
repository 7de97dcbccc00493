//! Event types for the LeadLink pipeline
//!
//! Provides shared event definitions and an EventBus for the pipeline
//! workers and the SSE surface.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
///
/// Events are broadcast via [`EventBus`] and serialized for SSE
/// transmission. Workers emit one event per committed stage transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A CSV was staged (or deduplicated onto an existing batch)
    BatchStaged {
        tenant_id: Uuid,
        batch_id: Uuid,
        lead_source_id: Uuid,
        deduplicated: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A staged batch finished parsing
    BatchParsed {
        tenant_id: Uuid,
        batch_id: Uuid,
        total_rows: i64,
        valid_rows: i64,
        error_rows: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A parsed batch finished transformation into canonical leads
    BatchTransformed {
        tenant_id: Uuid,
        batch_id: Uuid,
        leads_created: i64,
        duplicate_rows: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch failed terminally
    BatchFailed {
        tenant_id: Uuid,
        batch_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The matcher reached a terminal decision for one canonical lead
    LeadMatched {
        tenant_id: Uuid,
        canonical_lead_id: Uuid,
        match_status: String,
        confidence: Option<f64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reviewer approved or rejected a match candidate
    CandidateResolved {
        tenant_id: Uuid,
        candidate_id: Uuid,
        canonical_lead_id: Uuid,
        approved: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The embedding worker completed a run
    EmbeddingsFlushed {
        completed: i64,
        failed: i64,
        pending_remaining: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A CRM sync run finished
    CrmSyncCompleted {
        tenant_id: Uuid,
        crm_connection_id: Uuid,
        sync_log_id: Uuid,
        status: String,
        records_fetched: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast event bus shared by workers and the SSE endpoint.
///
/// Uses `tokio::sync::broadcast` internally: subscribers receive events
/// emitted after they subscribe, and slow subscribers drop the oldest
/// buffered events rather than blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscribers case.
    ///
    /// Pipeline progress is observable through the database regardless of
    /// listeners, so a lossy emit is always safe.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Channel capacity this bus was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PipelineEvent::EmbeddingsFlushed {
            completed: 3,
            failed: 0,
            pending_remaining: 7,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::EmbeddingsFlushed { completed, .. } => assert_eq!(completed, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_lossy() {
        let bus = EventBus::new(4);
        bus.emit_lossy(PipelineEvent::EmbeddingsFlushed {
            completed: 0,
            failed: 0,
            pending_remaining: 0,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
