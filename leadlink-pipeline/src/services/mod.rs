//! Pipeline services for leadlink-pipeline
//!
//! One module per pipeline stage, plus the outbound clients they use.

pub mod blob_store;
pub mod crm_client;
pub mod crm_puller;
pub mod csv_parser;
pub mod embedding_client;
pub mod embedding_worker;
pub mod ingestion_stager;
pub mod match_scorer;
pub mod matcher;
pub mod review_resolver;
pub mod transformer;

pub use blob_store::BlobStore;
pub use crm_client::CrmClient;
pub use crm_puller::CrmPuller;
pub use embedding_client::{EmbeddingClient, EmbeddingProvider};
pub use embedding_worker::EmbeddingWorker;
pub use ingestion_stager::IngestionStager;
pub use matcher::Matcher;
pub use review_resolver::ReviewResolver;
pub use transformer::Transformer;
