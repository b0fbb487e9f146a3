//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal config names only
//! the database path and the sources to scan. [`load_config`] parses and
//! validates the file; validation failures are hard errors.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use memex_core::rank::RankParams;
use memex_core::select::{default_domain_keywords, SelectParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// Lock file path; defaults to `<db path>.lock`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `flock` (OS advisory lock) or `lockfile` (exclusive create).
    #[serde(default = "default_lock_strategy")]
    pub strategy: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: None,
            strategy: default_lock_strategy(),
        }
    }
}

fn default_lock_strategy() -> String {
    "flock".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            pool_size: default_pool_size(),
            time_weight: default_time_weight(),
            half_life_days: default_half_life_days(),
        }
    }
}

impl RetrievalConfig {
    pub fn rank_params(&self) -> RankParams {
        RankParams {
            top_k: self.top_k,
            pool_size: self.pool_size,
            time_weight: self.time_weight,
            half_life_days: self.half_life_days,
        }
    }
}

fn default_top_k() -> usize {
    6
}
fn default_pool_size() -> usize {
    50
}
fn default_time_weight() -> f64 {
    0.35
}
fn default_half_life_days() -> f64 {
    14.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectorConfig {
    /// `tfidf` (TF-IDF + MMR) or `weight` (weight-only fallback).
    #[serde(default = "default_selector_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default = "default_max_per_chunk")]
    pub max_per_chunk: usize,
    #[serde(default = "default_diversity")]
    pub diversity: f64,
    #[serde(default = "default_domain_keywords")]
    pub domain_keywords: Vec<String>,
    #[serde(default = "default_domain_bias")]
    pub domain_bias: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: default_selector_strategy(),
            max_sentences: default_max_sentences(),
            max_per_chunk: default_max_per_chunk(),
            diversity: default_diversity(),
            domain_keywords: default_domain_keywords(),
            domain_bias: default_domain_bias(),
        }
    }
}

impl SelectorConfig {
    pub fn select_params(&self) -> SelectParams {
        SelectParams {
            max_sentences: self.max_sentences,
            max_per_chunk: self.max_per_chunk,
            diversity: self.diversity,
            domain_keywords: self
                .domain_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            domain_bias: self.domain_bias,
        }
    }
}

fn default_selector_strategy() -> String {
    "tfidf".to_string()
}
fn default_max_sentences() -> usize {
    18
}
fn default_max_per_chunk() -> usize {
    7
}
fn default_diversity() -> f64 {
    0.68
}
fn default_domain_bias() -> f64 {
    1.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Base directory for relative document paths and canonical names.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// `rel` names a source by its root-relative path, `base` by file name.
    #[serde(default = "default_source_style")]
    pub source_style: String,
    #[serde(default)]
    pub documents: Vec<DocumentSourceConfig>,
    #[serde(default)]
    pub logs: Option<LogSourceConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            source_style: default_source_style(),
            documents: Vec::new(),
            logs: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_source_style() -> String {
    "rel".to_string()
}

/// One structured note document (`[[sources.documents]]`).
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentSourceConfig {
    pub path: PathBuf,
    /// Chunk kind for every item, e.g. `memory_item`.
    pub kind: String,
    /// Dotted path to the item lists inside the document.
    pub list: String,
    /// Fallback path used when `list` is missing or empty.
    #[serde(default)]
    pub legacy_list: Option<String>,
    /// Also ingest the rest of the document as one metadata chunk.
    #[serde(default)]
    pub meta: bool,
}

/// Append-only conversation logs (`[sources.logs]`).
#[derive(Debug, Deserialize, Clone)]
pub struct LogSourceConfig {
    pub dir: PathBuf,
    #[serde(default = "default_log_globs")]
    pub include_globs: Vec<String>,
}

fn default_log_globs() -> Vec<String> {
    vec!["*.jsonl".to_string()]
}

impl Config {
    /// Lock file path, defaulting to the database path with `.lock` appended.
    pub fn lock_path(&self) -> PathBuf {
        self.lock.path.clone().unwrap_or_else(|| {
            let mut p = self.db.path.clone().into_os_string();
            p.push(".lock");
            PathBuf::from(p)
        })
    }

    /// Resolve a configured path against `sources.root`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.sources.root.join(path)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }

    match config.lock.strategy.as_str() {
        "flock" | "lockfile" => {}
        other => bail!(
            "Unknown lock strategy: '{}'. Must be flock or lockfile.",
            other
        ),
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.pool_size < config.retrieval.top_k {
        bail!("retrieval.pool_size must be >= retrieval.top_k");
    }
    if !(0.0..=1.0).contains(&config.retrieval.time_weight) {
        bail!("retrieval.time_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.half_life_days <= 0.0 {
        bail!("retrieval.half_life_days must be > 0");
    }

    match config.selector.strategy.as_str() {
        "tfidf" | "weight" => {}
        other => bail!(
            "Unknown selector strategy: '{}'. Must be tfidf or weight.",
            other
        ),
    }
    if !(0.0..=1.0).contains(&config.selector.diversity) {
        bail!("selector.diversity must be in [0.0, 1.0]");
    }
    if config.selector.max_per_chunk == 0 {
        bail!("selector.max_per_chunk must be > 0");
    }

    match config.sources.source_style.as_str() {
        "rel" | "base" => {}
        other => bail!(
            "Unknown source_style: '{}'. Must be rel or base.",
            other
        ),
    }
    for doc in &config.sources.documents {
        if doc.kind.trim().is_empty() || doc.list.trim().is_empty() {
            bail!(
                "sources.documents entry '{}' needs a kind and a list",
                doc.path.display()
            );
        }
    }
    if let Some(logs) = &config.sources.logs {
        for pattern in &logs.include_globs {
            globset::Glob::new(pattern).with_context(|| {
                format!("Invalid sources.logs.include_globs entry: '{}'", pattern)
            })?;
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.provider != "local" {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"data/memex.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_chars, 2000);
        assert_eq!(cfg.retrieval.top_k, 6);
        assert_eq!(cfg.retrieval.pool_size, 50);
        assert!((cfg.retrieval.time_weight - 0.35).abs() < 1e-9);
        assert_eq!(cfg.selector.strategy, "tfidf");
        assert_eq!(cfg.lock.strategy, "flock");
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.lock_path(), PathBuf::from("data/memex.sqlite.lock"));
    }

    #[test]
    fn test_documents_and_logs_parse() {
        let cfg = parse_config(
            r#"
[db]
path = "x.sqlite"

[sources]
root = "/notes"
source_style = "base"

[[sources.documents]]
path = "memory.toml"
kind = "memory_item"
list = "memory.lists"
legacy_list = "items"
meta = true

[sources.logs]
dir = "logs"
"#,
        )
        .unwrap();
        assert_eq!(cfg.sources.documents.len(), 1);
        assert!(cfg.sources.documents[0].meta);
        let logs = cfg.sources.logs.as_ref().unwrap();
        assert_eq!(logs.include_globs, vec!["*.jsonl"]);
        assert_eq!(cfg.resolve(Path::new("logs")), PathBuf::from("/notes/logs"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = "[db]\npath = \"x.sqlite\"\n";
        for extra in [
            "[retrieval]\ntime_weight = 1.5\n",
            "[retrieval]\ntop_k = 10\npool_size = 5\n",
            "[selector]\nstrategy = \"bm25\"\n",
            "[lock]\nstrategy = \"mutex\"\n",
            "[embedding]\nprovider = \"openai\"\n",
            "[embedding]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 3\n",
            "[chunking]\nmax_chars = 0\n",
            "[sources.logs]\ndir = \"logs\"\ninclude_globs = [\"[abc\"]\n",
        ] {
            let content = format!("{}{}", base, extra);
            assert!(parse_config(&content).is_err(), "accepted: {}", extra);
        }
    }
}
