//! Salient sentence selection over ranked chunks.
//!
//! Candidates are cut from the ranked chunks, weighted by retrieval score,
//! recency and a domain-keyword bias, de-duplicated case-insensitively, then
//! ordered by one of two [`SentenceRanker`] strategies:
//!
//! - [`WeightRanker`]: stable sort by heuristic weight.
//! - [`TfidfMmrRanker`]: TF-IDF relevance to the query blended with the
//!   normalized weight, then Maximal Marginal Relevance for diversity.
//!
//! The strategy is picked once via [`ranker_for`] and shared by reference.

use std::collections::HashSet;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::rank::RankedChunk;
use crate::text::SentenceSplitter;
use crate::tfidf::{sparse_cosine, TfidfVectorizer};

const MIN_SENTENCE_CHARS: usize = 36;
const MAX_SENTENCE_CHARS: usize = 360;
const RECENCY_BOOST: f64 = 0.28;
const QUERY_WEIGHT: f64 = 0.7;
const MAX_DF: f64 = 0.9;

/// Selection parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SelectParams {
    pub max_sentences: usize,
    pub max_per_chunk: usize,
    /// MMR trade-off λ: 1.0 is pure relevance, 0.0 pure novelty.
    pub diversity: f64,
    /// Lowercase substrings that mark a sentence or source as domain-relevant.
    pub domain_keywords: Vec<String>,
    pub domain_bias: f64,
}

impl Default for SelectParams {
    fn default() -> Self {
        Self {
            max_sentences: 18,
            max_per_chunk: 7,
            diversity: 0.68,
            domain_keywords: default_domain_keywords(),
            domain_bias: 1.15,
        }
    }
}

/// Keywords that earn a sentence the domain bias when no list is configured.
pub fn default_domain_keywords() -> Vec<String> {
    ["config", ".env", "dotenv", "schema", "validation", "configmodule"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A candidate sentence with its heuristic weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    /// Citation tag, `<source>#<seq>`.
    pub tag: String,
    pub weight: f64,
}

/// A selected sentence and the chunk it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedSentence {
    pub text: String,
    pub tag: String,
}

/// Orders de-duplicated candidates and keeps at most `max_sentences`.
pub trait SentenceRanker: Send + Sync {
    fn name(&self) -> &'static str;
    fn choose(&self, query: &str, candidates: &[Candidate], params: &SelectParams) -> Vec<usize>;
}

/// Weight-only ordering.
pub struct WeightRanker;

impl SentenceRanker for WeightRanker {
    fn name(&self) -> &'static str {
        "weight"
    }

    fn choose(&self, _query: &str, candidates: &[Candidate], params: &SelectParams) -> Vec<usize> {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        // sort_by is stable, so equal weights keep candidate order.
        order.sort_by(|&a, &b| {
            candidates[b]
                .weight
                .partial_cmp(&candidates[a].weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(params.max_sentences);
        order
    }
}

/// TF-IDF relevance with MMR diversity.
pub struct TfidfMmrRanker {
    vectorizer: TfidfVectorizer,
}

impl TfidfMmrRanker {
    /// # Errors
    ///
    /// Fails only if the tokenizer pattern does not compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            vectorizer: TfidfVectorizer::new(MAX_DF)?,
        })
    }
}

impl SentenceRanker for TfidfMmrRanker {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn choose(&self, query: &str, candidates: &[Candidate], params: &SelectParams) -> Vec<usize> {
        let n = candidates.len();
        let k = params.max_sentences.min(n);
        if k == 0 {
            return Vec::new();
        }

        let mut texts: Vec<&str> = Vec::with_capacity(n + 1);
        texts.push(query);
        texts.extend(candidates.iter().map(|c| c.text.as_str()));
        let vectors = self.vectorizer.fit_transform(&texts);
        let (q, sents) = vectors.split_at(1);

        let weights: Vec<f64> = candidates.iter().map(|c| c.weight).collect();
        let norm_w = normalize_weights(&weights);
        let relevance: Vec<f64> = sents
            .iter()
            .zip(&norm_w)
            .map(|(s, w)| QUERY_WEIGHT * sparse_cosine(s, &q[0]) + (1.0 - QUERY_WEIGHT) * w)
            .collect();

        let lambda = params.diversity;
        let mut chosen: Vec<usize> = Vec::with_capacity(k);
        let mut picked = vec![false; n];
        // Max similarity of each candidate to anything chosen so far.
        let mut penalty = vec![0.0f64; n];

        while chosen.len() < k {
            let mut best: Option<(usize, f64)> = None;
            for i in 0..n {
                if picked[i] {
                    continue;
                }
                let val = lambda * relevance[i] - (1.0 - lambda) * penalty[i];
                // Strict comparison keeps the lower index on ties.
                if best.map_or(true, |(_, b)| val > b) {
                    best = Some((i, val));
                }
            }
            let Some((i, _)) = best else { break };
            picked[i] = true;
            chosen.push(i);
            for j in 0..n {
                if !picked[j] {
                    penalty[j] = penalty[j].max(sparse_cosine(&sents[i], &sents[j]));
                }
            }
        }
        chosen
    }
}

/// Build the configured ranker strategy.
///
/// # Arguments
///
/// * `strategy` — `tfidf` or `weight`, as in `[selector] strategy`.
///
/// # Errors
///
/// Unknown strategy names are rejected.
pub fn ranker_for(strategy: &str) -> Result<Box<dyn SentenceRanker>> {
    match strategy {
        "tfidf" => Ok(Box::new(TfidfMmrRanker::new()?)),
        "weight" => Ok(Box::new(WeightRanker)),
        other => bail!("Unknown selector strategy: {}. Use tfidf or weight.", other),
    }
}

/// Min-max normalize weights; all-equal weights normalize to `0.0`.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let w_min = weights.iter().copied().fold(f64::INFINITY, f64::min);
    let w_max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = w_max - w_min;
    weights
        .iter()
        .map(|&w| if span > 0.0 { (w - w_min) / span } else { 0.0 })
        .collect()
}

/// Whether chunks of `kind` are atomic notes rather than running text.
pub fn is_note_kind(kind: &str) -> bool {
    matches!(kind, "memory_item" | "instruction_item" | "style_note")
        || kind.ends_with("_item")
        || kind.ends_with("_note")
}

/// Cut weighted candidate sentences out of ranked chunks.
///
/// Note kinds contribute their whole content as one sentence; other kinds
/// are split by `splitter`. At most `params.max_per_chunk` sentences are kept
/// per chunk, and sentences outside the length window are skipped.
///
/// Weight is `score × (1 + RECENCY_BOOST × recency)`, times `domain_bias`
/// when the source or sentence mentions a domain keyword.
pub fn candidates(
    splitter: &SentenceSplitter,
    ranked: &[RankedChunk],
    params: &SelectParams,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for chunk in ranked {
        let tag = format!("{}#{}", chunk.source, chunk.seq);
        let sentences = if is_note_kind(&chunk.kind) {
            vec![chunk.content.trim().to_string()]
        } else {
            splitter.split(&chunk.content)
        };

        let mut kept = 0;
        for sentence in sentences {
            if kept >= params.max_per_chunk {
                break;
            }
            let clean = splitter.strip_citations(&sentence);
            let len = clean.chars().count();
            if !(MIN_SENTENCE_CHARS..=MAX_SENTENCE_CHARS).contains(&len) {
                continue;
            }
            let haystack = format!("{}{}", chunk.source, clean).to_lowercase();
            let bias = if params
                .domain_keywords
                .iter()
                .any(|k| haystack.contains(k.as_str()))
            {
                params.domain_bias
            } else {
                1.0
            };
            out.push(Candidate {
                weight: chunk.score * (1.0 + RECENCY_BOOST * chunk.recency) * bias,
                text: clean,
                tag: tag.clone(),
            });
            kept += 1;
        }
    }
    out
}

/// Drop case-insensitive duplicates, keeping the first occurrence.
pub fn dedup(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.text.to_lowercase()))
        .collect()
}

/// Select salient, diverse sentences from ranked chunks.
///
/// # Arguments
///
/// * `splitter` — Sentence splitter shared across calls.
/// * `ranker` — Ordering strategy, usually from [`ranker_for`].
/// * `query` — The user's query text.
/// * `ranked` — Output of [`crate::rank::rank`].
/// * `params` — Sentence budget, per-chunk cap, diversity and domain bias.
///
/// # Guarantees
///
/// - Exactly `min(max_sentences, deduplicated candidates)` sentences.
/// - No two selected sentences are equal ignoring case.
/// - Each sentence is tagged `<source>#<seq>` of the chunk it came from.
pub fn select(
    splitter: &SentenceSplitter,
    ranker: &dyn SentenceRanker,
    query: &str,
    ranked: &[RankedChunk],
    params: &SelectParams,
) -> Vec<SelectedSentence> {
    let pool = dedup(candidates(splitter, ranked, params));
    ranker
        .choose(query, &pool, params)
        .into_iter()
        .map(|i| SelectedSentence {
            text: pool[i].text.clone(),
            tag: pool[i].tag.clone(),
        })
        .collect()
}
