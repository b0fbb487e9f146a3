//! `memex search`: hybrid retrieval plus local rendering.
//!
//! The query is embedded with the configured provider, ranked against the
//! active heads (similarity blended with recency), then rendered either as
//! the raw matches (`basic`) or as salient sentences with references
//! (`extractive`). No generative model is involved.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use memex_core::embedding::EmbeddingProvider;
use memex_core::rank::{rank, RankParams, RankedChunk};
use memex_core::select::{ranker_for, select, SelectParams, SelectedSentence, SentenceRanker};
use memex_core::text::SentenceSplitter;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index::SqliteHeadIndex;

const BODY_CHARS: usize = 900;
const NO_MATCHES: &str = "No local matches found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStyle {
    Basic,
    Extractive,
}

impl SearchStyle {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(SearchStyle::Basic),
            "extractive" => Ok(SearchStyle::Extractive),
            other => bail!("Unknown search style: '{}'. Must be basic or extractive.", other),
        }
    }
}

/// Per-invocation overrides of `[retrieval]` and `[selector]`.
#[derive(Debug, Clone, Default)]
pub struct SearchOverrides {
    pub top_k: Option<usize>,
    pub pool_size: Option<usize>,
    pub time_weight: Option<f64>,
    pub max_sentences: Option<usize>,
}

/// Ranking and selection handles, built once per process.
pub struct Searcher {
    splitter: SentenceSplitter,
    ranker: Box<dyn SentenceRanker>,
    rank_params: RankParams,
    select_params: SelectParams,
}

impl Searcher {
    pub fn new(config: &Config, overrides: &SearchOverrides) -> Result<Self> {
        let mut rank_params = config.retrieval.rank_params();
        if let Some(k) = overrides.top_k {
            rank_params.top_k = k;
        }
        if let Some(pool) = overrides.pool_size {
            rank_params.pool_size = pool;
        }
        if let Some(w) = overrides.time_weight {
            if !(0.0..=1.0).contains(&w) {
                bail!("--w-time must be in [0.0, 1.0]");
            }
            rank_params.time_weight = w;
        }
        rank_params.pool_size = rank_params.pool_size.max(rank_params.top_k);

        let mut select_params = config.selector.select_params();
        if let Some(n) = overrides.max_sentences {
            select_params.max_sentences = n;
        }

        Ok(Self {
            splitter: SentenceSplitter::new()?,
            ranker: ranker_for(&config.selector.strategy)?,
            rank_params,
            select_params,
        })
    }

    pub fn rank_params(&self) -> &RankParams {
        &self.rank_params
    }

    pub async fn rank(
        &self,
        pool: &SqlitePool,
        query_vec: &[f32],
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedChunk>> {
        let index = SqliteHeadIndex::new(pool.clone());
        rank(&index, query_vec, &self.rank_params, now).await
    }

    pub fn select(&self, query: &str, ranked: &[RankedChunk]) -> Vec<SelectedSentence> {
        select(
            &self.splitter,
            self.ranker.as_ref(),
            query,
            ranked,
            &self.select_params,
        )
    }
}

/// Embed `query` and rank it against the database.
pub async fn search_ranked(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    searcher: &Searcher,
    query: &str,
    now: DateTime<Utc>,
) -> Result<Vec<RankedChunk>> {
    let query_vec = embedding::embed_query(provider, query).await?;
    let pool = db::connect(config).await?;
    let ranked = searcher.rank(&pool, &query_vec, now).await;
    pool.close().await;
    ranked
}

fn truncate(s: &str, n: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= n {
        return s.to_string();
    }
    let head: String = s.chars().take(n).collect();
    format!("{} …[truncated]", head)
}

/// Numbered matches with their score breakdown.
pub fn render_basic(ranked: &[RankedChunk]) -> String {
    if ranked.is_empty() {
        return NO_MATCHES.to_string();
    }
    let mut lines = vec!["Top matches:".to_string(), String::new()];
    for (i, c) in ranked.iter().enumerate() {
        lines.push(format!(
            "[{}] {}#{}  kind={}  score={:.3}  sim={:.3}  time={:.3}",
            i + 1,
            c.source,
            c.seq,
            c.kind,
            c.score,
            c.similarity,
            c.recency
        ));
        lines.push(format!("updated_at={}", c.updated_at));
        lines.push(truncate(&c.content, BODY_CHARS));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Bulleted sentences followed by their unique references, in first-use
/// order. Falls back to the basic listing when nothing survives selection.
pub fn render_extractive(ranked: &[RankedChunk], selected: &[SelectedSentence]) -> String {
    if ranked.is_empty() {
        return NO_MATCHES.to_string();
    }
    if selected.is_empty() {
        return render_basic(ranked);
    }

    let mut tags: Vec<&str> = Vec::new();
    for s in selected {
        if !tags.contains(&s.tag.as_str()) {
            tags.push(&s.tag);
        }
    }

    let mut out = String::from("Local summary (extractive):\n\n");
    for s in selected {
        out.push_str(&format!("- {}\n", s.text));
    }
    out.push_str("\nReferences:\n");
    for tag in tags {
        out.push_str(&format!("  • {}\n", tag));
    }
    out.trim_end().to_string()
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    results: &'a [RankedChunk],
    #[serde(skip_serializing_if = "Option::is_none")]
    sentences: Option<&'a [SelectedSentence]>,
}

/// `memex search`.
pub async fn search_cmd(
    config: &Config,
    query: &str,
    style: SearchStyle,
    json: bool,
    overrides: &SearchOverrides,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("search query must not be empty");
    }
    if !config.embedding.is_enabled() {
        bail!("search requires an embedding provider; set [embedding] provider in the config");
    }

    let searcher = Searcher::new(config, overrides)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let ranked = search_ranked(config, provider.as_ref(), &searcher, query, Utc::now()).await?;
    tracing::debug!(query, results = ranked.len(), "ranked");

    let selected = match style {
        SearchStyle::Extractive => Some(searcher.select(query, &ranked)),
        SearchStyle::Basic => None,
    };

    if json {
        let out = JsonOutput {
            query,
            results: &ranked,
            sentences: selected.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match &selected {
        Some(selected) => println!("{}", render_extractive(&ranked, selected)),
        None => println!("{}", render_basic(&ranked)),
    }
    Ok(())
}
