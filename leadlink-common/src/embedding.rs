//! Embedding vector codec
//!
//! Embeddings are stored as BLOB columns holding little-endian f32 values.
//! The expected dimension (default 1536) is carried in configuration; the
//! decoder validates length so a truncated blob surfaces as an error rather
//! than a silently short vector.

use crate::{Error, Result};

/// Default embedding dimension (text-embedding provider output width).
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Encode an f32 vector as a little-endian byte blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte blob back into an f32 vector.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let mut vector = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}
