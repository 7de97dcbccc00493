//! Write-once blob storage for staged CSV files
//!
//! Files land under `<root>/ingestions/<epoch_ms>_<filename>`. Staging
//! coalesces identical uploads by content hash before reaching this store,
//! so every write here is a new blob.

use leadlink_common::{Error, Result};
use std::path::{Path, PathBuf};

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist one staged CSV; returns the storage-relative reference.
    pub fn store_ingestion(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let safe_name = sanitize_filename(filename);
        let epoch_ms = chrono::Utc::now().timestamp_millis();
        let relative = format!("ingestions/{}_{}", epoch_ms, safe_name);

        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            return Err(Error::Conflict(format!(
                "Blob already exists: {}",
                relative
            )));
        }

        std::fs::write(&path, bytes)?;
        tracing::debug!(file_ref = %relative, size = bytes.len(), "Stored ingestion blob");

        Ok(relative)
    }

    /// Read a previously stored blob back.
    pub fn read(&self, file_ref: &str) -> Result<Vec<u8>> {
        let path = self.root.join(file_ref);
        Ok(std::fs::read(path)?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keep the original name readable while stripping path separators and
/// control characters.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}
