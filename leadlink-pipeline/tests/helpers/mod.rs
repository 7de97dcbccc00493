//! Shared test utilities
//!
//! Builds a temp-dir database with the full schema, seeds tenants,
//! sources, CRM fixtures, and provides a scriptable embedding provider.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use leadlink_common::config::ServiceConfig;
use leadlink_common::events::EventBus;
use leadlink_common::{Error, Result};
use leadlink_pipeline::db::{agents, crm};
use leadlink_pipeline::services::EmbeddingProvider;
use leadlink_pipeline::AppState;

/// Create a test database and app state rooted in a temp dir.
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn setup() -> (TempDir, AppState) {
    let temp_dir = TempDir::new().unwrap();

    let mut config = ServiceConfig::default();
    config.database_path = temp_dir.path().join("leadlink_test.db");
    config.storage_root = temp_dir.path().join("storage");
    config.embedding.dimension = 8;

    let pool = leadlink_common::db::init_database_pool(&config.database_path)
        .await
        .unwrap();
    let event_bus = EventBus::new(100);

    (temp_dir, AppState::new(pool, event_bus, config))
}

pub fn new_tenant() -> String {
    Uuid::new_v4().to_string()
}

/// Seed a Zillow-style lead source with the standard mapping.
pub async fn seed_source(pool: &SqlitePool, tenant_id: &str) -> String {
    let csv_config = r#"{"delimiter": ",", "has_header": true, "skip_rows": 0}"#;
    let field_mapping = r#"{
        "first_name": ["First Name"],
        "last_name": ["Last Name"],
        "email": ["Email", "Email Address"],
        "phone": ["Phone"],
        "address": ["Address"],
        "city": ["City"],
        "state": ["State"],
        "zip": ["Zip"],
        "lead_type": ["Lead Type"],
        "source_created_at": ["Created"]
    }"#;
    let validation_rules =
        r#"{"required_fields": ["email"], "email_regex": "^[^@\\s]+@[^@\\s]+\\.[^@\\s]+$"}"#;

    let source = leadlink_pipeline::db::sources::insert(
        pool,
        tenant_id,
        "zillow",
        "Zillow",
        csv_config,
        field_mapping,
        validation_rules,
    )
    .await
    .unwrap();

    source.id
}

/// Seed a CRM connection (inactive base_url; sync tests use fakes).
pub async fn seed_crm_connection(pool: &SqlitePool, tenant_id: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO crm_connections
            (id, tenant_id, name, base_url, api_key, active, created_at, updated_at)
        VALUES (?, ?, 'Test CRM', 'http://127.0.0.1:1/v1', 'test-key', 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();

    id
}

/// Seed one mirrored CRM lead directly.
pub async fn seed_crm_lead(
    pool: &SqlitePool,
    tenant_id: &str,
    connection_id: &str,
    external_id: &str,
    email: Option<&str>,
    phone: Option<&str>,
    address: Option<&str>,
    assigned_user_id: Option<&str>,
) -> String {
    use leadlink_common::normalize;

    let lead = crm::NewCrmLead {
        tenant_id: tenant_id.to_string(),
        crm_connection_id: connection_id.to_string(),
        external_id: external_id.to_string(),
        first_name: Some("Crm".to_string()),
        last_name: Some("Person".to_string()),
        email: email.map(String::from),
        email_normalized: email.and_then(normalize::normalize_email),
        phone: phone.map(String::from),
        phone_normalized: phone.and_then(normalize::normalize_phone),
        address: address.map(String::from),
        address_normalized: address.and_then(normalize::clean_address),
        assigned_user_id: assigned_user_id.map(String::from),
        assigned_user_email: None,
        assigned_user_name: None,
        stage: Some("Lead".to_string()),
        source: None,
        tags: "[]".to_string(),
        sync_hash: "seeded".to_string(),
        crm_updated_at: None,
    };

    crm::insert_lead(pool, &lead).await.unwrap()
}

/// Seed a team and an agent mapped to a CRM user id. Returns
/// (team_id, agent_id).
pub async fn seed_team_and_agent(
    pool: &SqlitePool,
    tenant_id: &str,
    crm_user_id: &str,
) -> (String, String) {
    let team_id = agents::insert_team(pool, tenant_id, "Team T").await.unwrap();
    let agent_id = agents::insert_agent(
        pool,
        tenant_id,
        Some(&team_id),
        "Agent A",
        Some("agent@example.com"),
        Some(crm_user_id),
    )
    .await
    .unwrap();

    (team_id, agent_id)
}

/// Embedding provider fake: fails the first `fail_first` calls, then
/// returns fixed-width vectors.
pub struct FakeEmbeddingProvider {
    pub dimension: usize,
    pub fail_first: usize,
    pub calls: AtomicUsize,
}

impl FakeEmbeddingProvider {
    pub fn new(dimension: usize, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            dimension,
            fail_first,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(Error::Internal("provider unavailable".to_string()));
        }
        Ok(texts.iter().map(|_| vec![0.25_f32; self.dimension]).collect())
    }
}

/// Base64 helper for staging requests.
pub fn b64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
