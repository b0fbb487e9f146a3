//! In-memory [`HeadIndex`] implementation for tests.
//!
//! Holds one vector per active head behind a `std::sync::RwLock`. Search is
//! brute-force cosine distance over all stored entries.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;

use super::{HeadCandidate, HeadIndex};

struct StoredHead {
    candidate: HeadCandidate,
    vector: Vec<f32>,
}

/// In-memory head index keyed by chunk id.
pub struct InMemoryHeadIndex {
    heads: RwLock<HashMap<String, StoredHead>>,
}

impl InMemoryHeadIndex {
    pub fn new() -> Self {
        Self {
            heads: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the vector for an active head.
    ///
    /// The candidate's `distance` field is ignored; it is recomputed per query.
    pub fn upsert(&self, candidate: HeadCandidate, vector: Vec<f32>) {
        let mut heads = self.heads.write().unwrap();
        heads.insert(
            candidate.chunk_id.clone(),
            StoredHead { candidate, vector },
        );
    }

    /// Remove a head (soft-deleted or superseded).
    pub fn remove(&self, chunk_id: &str) -> bool {
        self.heads.write().unwrap().remove(chunk_id).is_some()
    }

    /// Number of heads holding a vector.
    pub fn len(&self) -> usize {
        self.heads.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHeadIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HeadIndex for InMemoryHeadIndex {
    async fn nearest_heads(&self, query_vec: &[f32], limit: usize) -> Result<Vec<HeadCandidate>> {
        let heads = self.heads.read().unwrap();
        let mut candidates: Vec<HeadCandidate> = heads
            .values()
            .map(|stored| {
                let mut c = stored.candidate.clone();
                c.distance = cosine_distance(query_vec, &stored.vector);
                c
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(id: &str) -> HeadCandidate {
        HeadCandidate {
            chunk_id: id.to_string(),
            distance: 0.0,
            source: "notes.toml".to_string(),
            kind: "memory_item".to_string(),
            key: id.to_string(),
            seq: 0,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            content: format!("content of {}", id),
        }
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance_and_limits() {
        let index = InMemoryHeadIndex::new();
        index.upsert(head("far"), vec![0.0, 1.0]);
        index.upsert(head("near"), vec![1.0, 0.05]);
        index.upsert(head("mid"), vec![1.0, 1.0]);

        let got = index.nearest_heads(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = got.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(got[0].distance <= got[1].distance);
    }

    #[tokio::test]
    async fn test_remove_hides_head() {
        let index = InMemoryHeadIndex::new();
        index.upsert(head("a"), vec![1.0, 0.0]);
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.nearest_heads(&[1.0, 0.0], 10).await.unwrap().is_empty());
    }
}
