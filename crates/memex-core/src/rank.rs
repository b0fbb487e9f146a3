//! Hybrid retrieval ranker: vector similarity blended with recency.
//!
//! The ranker operates entirely through the [`HeadIndex`] trait. The caller
//! embeds the query and supplies the current time, which keeps ranking
//! deterministic under test.
//!
//! # Scoring
//!
//! 1. Fetch up to `pool_size` nearest active heads (raw cosine distance).
//! 2. Min-max normalize distances into a similarity in `[0, 1]`:
//!    `sim = 1 - (d - d_min) / (d_max - d_min)`, or `1.0` when all are equal.
//! 3. `recency = 0.5 ^ (age_days / half_life_days)`; missing or unparseable
//!    timestamps score `0.0`, future timestamps score `1.0`.
//! 4. `score = (1 - w) × sim + w × recency`.
//! 5. Sort by score (desc), distance (asc), chunk id (asc); keep `top_k`.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::store::{HeadCandidate, HeadIndex};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Ranking parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RankParams {
    /// Maximum results to return.
    pub top_k: usize,
    /// Number of nearest heads fetched before blending.
    pub pool_size: usize,
    /// Recency weight `w` in `[0, 1]`.
    pub time_weight: f64,
    /// Age at which recency halves.
    pub half_life_days: f64,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            top_k: 6,
            pool_size: 50,
            time_weight: 0.35,
            half_life_days: 14.0,
        }
    }
}

/// A ranked head chunk with its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub distance: f64,
    pub similarity: f64,
    pub recency: f64,
    pub score: f64,
    pub source: String,
    pub kind: String,
    pub key: String,
    pub seq: i64,
    pub updated_at: String,
    pub content: String,
}

/// Rank the nearest active heads for `query_vec`.
///
/// # Arguments
///
/// * `index` — Nearest-neighbour lookup over active heads.
/// * `query_vec` — The embedded query; must match the stored vector width.
/// * `params` — Pool size, result count and recency blend.
/// * `now` — Reference time for recency.
///
/// # Errors
///
/// Only errors from [`HeadIndex::nearest_heads`] propagate. An empty index,
/// a zero `top_k` or a zero `pool_size` yield an empty result.
pub async fn rank<I: HeadIndex + ?Sized>(
    index: &I,
    query_vec: &[f32],
    params: &RankParams,
    now: DateTime<Utc>,
) -> Result<Vec<RankedChunk>> {
    if params.top_k == 0 || params.pool_size == 0 {
        return Ok(Vec::new());
    }
    let pool = index.nearest_heads(query_vec, params.pool_size).await?;
    Ok(rank_pool(pool, params, now))
}

/// Blend and order an already-fetched candidate pool.
///
/// # Guarantees
///
/// - At most `params.top_k` results, ordered by score, distance, chunk id.
/// - Every score lies in `[0, 1]`; `time_weight` is clamped to that range.
pub fn rank_pool(
    pool: Vec<HeadCandidate>,
    params: &RankParams,
    now: DateTime<Utc>,
) -> Vec<RankedChunk> {
    if pool.is_empty() {
        return Vec::new();
    }

    let w = params.time_weight.clamp(0.0, 1.0);
    let distances: Vec<f64> = pool.iter().map(|c| c.distance).collect();
    let sims = normalize_distances(&distances);

    let mut ranked: Vec<RankedChunk> = pool
        .into_iter()
        .zip(sims)
        .map(|(c, sim)| {
            let recency = recency_score(&c.updated_at, now, params.half_life_days);
            RankedChunk {
                score: (1.0 - w) * sim + w * recency,
                similarity: sim,
                recency,
                chunk_id: c.chunk_id,
                distance: c.distance,
                source: c.source,
                kind: c.kind,
                key: c.key,
                seq: c.seq,
                updated_at: c.updated_at,
                content: c.content,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked.truncate(params.top_k);
    ranked
}

/// Min-max normalize distances into similarities (nearest = 1.0).
///
/// If all distances are equal, every similarity is `1.0`.
pub fn normalize_distances(distances: &[f64]) -> Vec<f64> {
    if distances.is_empty() {
        return Vec::new();
    }
    let d_min = distances.iter().copied().fold(f64::INFINITY, f64::min);
    let d_max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = d_max - d_min;

    distances
        .iter()
        .map(|&d| {
            if span.abs() < f64::EPSILON {
                1.0
            } else {
                (1.0 - (d - d_min) / span).clamp(0.0, 1.0)
            }
        })
        .collect()
}

/// Exponential-decay recency in `[0, 1]` for an RFC 3339 timestamp.
///
/// `1.0` at `now` or later, `0.5` one half-life back, `0.0` when the
/// timestamp is missing or unparseable.
pub fn recency_score(updated_at: &str, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let Some(ts) = parse_timestamp(updated_at) else {
        return 0.0;
    };
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = (now - ts).num_seconds() as f64 / SECONDS_PER_DAY;
    if age_days <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_days / half_life_days)
}

/// Parse an RFC 3339 timestamp, accepting a naive `YYYY-MM-DDTHH:MM:SS` as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryHeadIndex;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn cand(id: &str, distance: f64, updated_at: &str) -> HeadCandidate {
        HeadCandidate {
            chunk_id: id.to_string(),
            distance,
            source: "logs/chat.jsonl".to_string(),
            kind: "turn".to_string(),
            key: id.to_string(),
            seq: 0,
            updated_at: updated_at.to_string(),
            content: String::new(),
        }
    }

    fn params(w: f64) -> RankParams {
        RankParams {
            time_weight: w,
            ..RankParams::default()
        }
    }

    #[test]
    fn test_normalize_distances_range() {
        let sims = normalize_distances(&[0.1, 0.3, 0.5]);
        assert!((sims[0] - 1.0).abs() < 1e-9);
        assert!((sims[1] - 0.5).abs() < 1e-9);
        assert!(sims[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_distances_all_equal() {
        for s in normalize_distances(&[0.4, 0.4, 0.4]) {
            assert!((s - 1.0).abs() < 1e-9);
        }
        assert!(normalize_distances(&[]).is_empty());
    }

    #[test]
    fn test_recency_half_life() {
        let ts = (now() - Duration::days(14)).to_rfc3339();
        assert!((recency_score(&ts, now(), 14.0) - 0.5).abs() < 1e-9);
        let ts = now().to_rfc3339();
        assert!((recency_score(&ts, now(), 14.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_recency_missing_or_garbage_is_zero() {
        assert_eq!(recency_score("", now(), 14.0), 0.0);
        assert_eq!(recency_score("yesterday", now(), 14.0), 0.0);
    }

    #[test]
    fn test_recency_future_clamps_to_one() {
        let ts = (now() + Duration::days(3)).to_rfc3339();
        assert_eq!(recency_score(&ts, now(), 14.0), 1.0);
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let dt = parse_timestamp("2026-03-01T12:00:00").unwrap();
        assert_eq!(dt, now());
    }

    #[test]
    fn test_zero_time_weight_orders_by_distance() {
        let stamp = now().to_rfc3339();
        let old = (now() - Duration::days(400)).to_rfc3339();
        let pool = vec![cand("b", 0.5, &stamp), cand("a", 0.1, &old)];
        let ranked = rank_pool(pool, &params(0.0), now());
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_full_time_weight_orders_by_recency() {
        let fresh = now().to_rfc3339();
        let stale = (now() - Duration::days(60)).to_rfc3339();
        let pool = vec![cand("near", 0.1, &stale), cand("far", 0.9, &fresh)];
        let ranked = rank_pool(pool, &params(1.0), now());
        assert_eq!(ranked[0].chunk_id, "far");
    }

    #[test]
    fn test_ties_break_on_distance_then_id() {
        // Equal distances give sim 1.0 each; missing timestamps give recency 0.
        let pool = vec![cand("z", 0.2, ""), cand("y", 0.2, ""), cand("x", 0.2, "")];
        let ranked = rank_pool(pool, &params(0.35), now());
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_scores_bounded_and_truncated() {
        let pool: Vec<HeadCandidate> = (0..20)
            .map(|i| {
                let ts = (now() - Duration::days(i)).to_rfc3339();
                cand(&format!("c{:02}", i), i as f64 * 0.05, &ts)
            })
            .collect();
        let p = RankParams {
            top_k: 5,
            ..params(0.5)
        };
        let ranked = rank_pool(pool, &p, now());
        assert_eq!(ranked.len(), 5);
        for r in &ranked {
            assert!(r.score >= 0.0 && r.score <= 1.0, "score {}", r.score);
        }
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_rank_empty_index_is_empty() {
        let index = InMemoryHeadIndex::new();
        let ranked = rank(&index, &[1.0, 0.0], &RankParams::default(), now())
            .await
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn test_rank_through_index() {
        let index = InMemoryHeadIndex::new();
        let ts = now().to_rfc3339();
        index.upsert(cand("match", 0.0, &ts), vec![1.0, 0.0]);
        index.upsert(cand("other", 0.0, &ts), vec![0.0, 1.0]);
        let ranked = rank(&index, &[1.0, 0.1], &params(0.0), now())
            .await
            .unwrap();
        assert_eq!(ranked[0].chunk_id, "match");
        assert!((ranked[0].similarity - 1.0).abs() < 1e-9);
        assert!(ranked[1].similarity.abs() < 1e-9);
    }
}
