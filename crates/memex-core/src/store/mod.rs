//! Read-side storage abstraction for retrieval.
//!
//! The [`HeadIndex`] trait is the only storage operation the ranker needs:
//! a nearest-neighbour lookup restricted to active head revisions. The app
//! crate implements it over SQLite; [`memory::InMemoryHeadIndex`] is a
//! brute-force implementation for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// An active head chunk returned by a nearest-neighbour lookup.
///
/// Carries everything the ranker and the sentence selector need, so no
/// further round-trips are required after the lookup.
#[derive(Debug, Clone)]
pub struct HeadCandidate {
    pub chunk_id: String,
    /// Raw vector distance to the query (smaller is nearer).
    pub distance: f64,
    pub source: String,
    pub kind: String,
    pub key: String,
    pub seq: i64,
    /// RFC 3339 timestamp of the head's last write or refresh.
    pub updated_at: String,
    pub content: String,
}

/// Nearest-neighbour lookup over the vectors of active head chunks.
#[async_trait]
pub trait HeadIndex: Send + Sync {
    /// Return up to `limit` active heads ordered by ascending distance.
    ///
    /// Soft-deleted and superseded revisions must never be returned.
    async fn nearest_heads(&self, query_vec: &[f32], limit: usize) -> Result<Vec<HeadCandidate>>;
}
