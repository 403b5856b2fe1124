//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization,
//! normalization, and similarity computation.
//!
//! Concrete provider implementations (OpenAI, Ollama, fastembed, hashed)
//! live in the `askdoc` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Tolerance used when checking that a vector has unit norm.
pub const UNIT_NORM_EPSILON: f32 = 1e-3;

/// Trait for embedding providers.
///
/// Each text is embedded independently; implementations may batch
/// requests internally but the output for one text must not depend on
/// the other texts in the batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-mpnet-base-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Load whatever the provider needs before its first `embed` call.
    ///
    /// Callers run this outside their per-call timeouts, so slow one-off
    /// setup such as a model download is not mistaken for a hung request.
    /// Must be cheap once it has succeeded.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Embed `texts` and enforce the index invariants on the output.
///
/// Every returned vector is L2-normalized. Fails if the provider returns
/// the wrong number of vectors, a vector of the wrong dimension, or a zero
/// vector that cannot be normalized.
pub async fn embed_normalized(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let raw = provider.embed(texts).await?;
    if raw.len() != texts.len() {
        bail!(
            "embedding provider '{}' returned {} vectors for {} texts",
            provider.model_name(),
            raw.len(),
            texts.len()
        );
    }

    let dims = provider.dims();
    raw.into_iter()
        .enumerate()
        .map(|(i, v)| {
            if v.len() != dims {
                bail!(
                    "embedding {} has dimension {}, expected {}",
                    i,
                    v.len(),
                    dims
                );
            }
            normalize_l2(v).ok_or_else(|| anyhow::anyhow!("embedding {} is a zero vector", i))
        })
        .collect()
}

/// Scale `v` to unit L2 norm. Returns `None` for zero or non-finite vectors.
pub fn normalize_l2(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < 1e-9 {
        return None;
    }
    for x in &mut v {
        *x /= norm;
    }
    Some(v)
}

/// True when `v` has unit L2 norm within [`UNIT_NORM_EPSILON`].
pub fn is_unit_norm(v: &[f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() < UNIT_NORM_EPSILON
}

/// Inner product. Equals cosine similarity for unit vectors.
///
/// Returns `0.0` for vectors of different lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use askdoc_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
