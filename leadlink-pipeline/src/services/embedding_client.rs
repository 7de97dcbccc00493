//! Embedding provider client
//!
//! Batches texts to the provider's `/embeddings` endpoint. The response's
//! `data[i].index` is authoritative for realigning vectors with inputs.
//! The provider seam is a trait so workers and tests can swap in fakes.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use leadlink_common::config::EmbeddingConfig;
use leadlink_common::{Error, Result};

/// Hard ceiling the provider accepts per request.
pub const MAX_BATCH_INPUTS: usize = 2048;

/// Seam between the embedding worker and the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts; result index i corresponds to input i.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedding client
pub struct EmbeddingClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > MAX_BATCH_INPUTS {
            return Err(Error::InvalidInput(format!(
                "Embedding batch of {} exceeds provider limit {}",
                texts.len(),
                MAX_BATCH_INPUTS
            )));
        }

        let url = format!("{}/embeddings", self.base_url);
        tracing::debug!(url = %url, inputs = texts.len(), "Requesting embeddings");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Embedding provider returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;

        // Realign by the response's declared index
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for datum in parsed.data {
            if datum.index >= texts.len() {
                return Err(Error::Internal(format!(
                    "Embedding response index {} out of range",
                    datum.index
                )));
            }
            if datum.embedding.len() != self.dimension {
                return Err(Error::Internal(format!(
                    "Embedding dimension {} does not match expected {}",
                    datum.embedding.len(),
                    self.dimension
                )));
            }
            vectors[datum.index] = Some(datum.embedding);
        }

        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    Error::Internal(format!("Embedding response missing vector for input {}", i))
                })
            })
            .collect()
    }
}
