//! HTTP API handlers for leadlink-pipeline

pub mod admin;
pub mod health;
pub mod review;
pub mod sse;
pub mod staging;

pub use admin::admin_routes;
pub use health::health_routes;
pub use review::review_routes;
pub use sse::pipeline_event_stream;
pub use staging::staging_routes;
