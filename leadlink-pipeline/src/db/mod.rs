//! Database access for leadlink-pipeline
//!
//! One module per entity family. All multi-row state changes run inside a
//! single transaction at the call site so any external reader observes a
//! consistent state; claim statements are single atomic UPDATEs.

pub mod agents;
pub mod batches;
pub mod crm;
pub mod embedding_queue;
pub mod leads;
pub mod lineage;
pub mod matches;
pub mod raw_rows;
pub mod sources;

/// Current time as the RFC 3339 TEXT the schema stores.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
