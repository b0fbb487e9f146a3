//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization and
//! similarity computation.
//!
//! Concrete provider implementations (OpenAI, Ollama, fastembed) live in the
//! `memex` app crate. A provider is constructed once per process and shared by
//! reference with the ingestion pipeline and the search command.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Vector column encoding: `dims × 4` bytes, each component a little-endian
/// `f32`.
///
/// ```rust
/// use memex_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0, 2.0];
/// assert_eq!(vec_to_blob(&v).len(), 12);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes short of a full `f32` are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`.
///
/// `0.0` when the lengths differ, either vector is empty, or either has zero
/// norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, x, y), (&p, &q)| {
        let (p, q) = (p as f64, q as f64);
        (d + p * q, x + p * p, y + q * q)
    });
    let norm = aa.sqrt() * bb.sqrt();
    if norm <= f64::EPSILON {
        return 0.0;
    }
    (dot / norm) as f32
}

/// Cosine distance `1 − cos(a, b)`, in `[0.0, 2.0]`. Smaller is nearer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}
