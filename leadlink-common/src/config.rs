//! Configuration loading and data directory resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Embedding provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider base URL (the `/embeddings` endpoint is appended)
    pub base_url: String,
    /// Bearer token for the provider
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Expected vector width
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: crate::embedding::DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Worker scheduling settings (seconds between polls per loop)
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_parse_interval")]
    pub parse_interval_secs: u64,
    #[serde(default = "default_transform_interval")]
    pub transform_interval_secs: u64,
    #[serde(default = "default_match_interval")]
    pub match_interval_secs: u64,
    #[serde(default = "default_embed_interval")]
    pub embed_interval_secs: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    #[serde(default = "default_crm_sync_interval")]
    pub crm_sync_interval_secs: u64,
    /// Embedding tasks claimed per worker run
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: i64,
    /// Per-item retry ceiling across all queues
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Match candidates expire this many days after creation
    #[serde(default = "default_candidate_ttl_days")]
    pub candidate_ttl_days: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parse_interval_secs: default_parse_interval(),
            transform_interval_secs: default_transform_interval(),
            match_interval_secs: default_match_interval(),
            embed_interval_secs: default_embed_interval(),
            reap_interval_secs: default_reap_interval(),
            crm_sync_interval_secs: default_crm_sync_interval(),
            embed_batch_size: default_embed_batch_size(),
            max_attempts: default_max_attempts(),
            candidate_ttl_days: default_candidate_ttl_days(),
        }
    }
}

fn default_dimension() -> usize {
    crate::embedding::DEFAULT_EMBEDDING_DIMENSION
}
fn default_parse_interval() -> u64 {
    5
}
fn default_transform_interval() -> u64 {
    5
}
fn default_match_interval() -> u64 {
    10
}
fn default_embed_interval() -> u64 {
    15
}
fn default_reap_interval() -> u64 {
    300
}
fn default_crm_sync_interval() -> u64 {
    3600
}
fn default_embed_batch_size() -> i64 {
    50
}
fn default_max_attempts() -> i64 {
    3
}
fn default_candidate_ttl_days() -> i64 {
    7
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Root folder for blob storage (`ingestions/` lives under it)
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Outbound CRM request timeout (seconds)
    #[serde(default = "default_crm_timeout")]
    pub crm_timeout_secs: u64,
    /// Outbound embedding request timeout (seconds)
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_secs: u64,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("leadlink.db")
}
fn default_bind_address() -> String {
    "127.0.0.1:5810".to_string()
}
fn default_storage_root() -> PathBuf {
    default_data_dir().join("storage")
}
fn default_crm_timeout() -> u64 {
    30
}
fn default_embedding_timeout() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            storage_root: default_storage_root(),
            crm_timeout_secs: default_crm_timeout(),
            embedding_timeout_secs: default_embedding_timeout(),
            embedding: EmbeddingConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration following the priority order:
    /// 1. Explicit path argument (highest)
    /// 2. `LEADLINK_CONFIG` environment variable
    /// 3. `~/.config/leadlink/config.toml`
    /// 4. Compiled defaults
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(&PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("LEADLINK_CONFIG") {
            return Self::from_file(&PathBuf::from(path));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("leadlink").join("config.toml");
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    pub fn crm_timeout(&self) -> Duration {
        Duration::from_secs(self.crm_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("leadlink"))
        .unwrap_or_else(|| PathBuf::from("./leadlink_data"))
}
