//! Ingestion run orchestration.
//!
//! One run takes the single-writer lock, checks the vector width, scans every
//! configured note document and log file (one transaction per source), then
//! backfills any active heads still missing a vector. A failed source is
//! rolled back and reported; the other sources go on.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::fmt;

use memex_core::embedding::EmbeddingProvider;
use memex_core::models::SourceKind;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::SyncResult;
use crate::index;
use crate::lock;
use crate::migrate;
use crate::scan_log;
use crate::scan_notes;
use crate::sources;

/// Which scanners a run executes (`memex sync --only`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    All,
    Documents,
    Logs,
}

impl SyncScope {
    fn documents(self) -> bool {
        matches!(self, SyncScope::All | SyncScope::Documents)
    }
    fn logs(self) -> bool {
        matches!(self, SyncScope::All | SyncScope::Logs)
    }
}

/// Shared handles for the scanners of one run.
pub struct SyncContext<'a> {
    pub config: &'a Config,
    pub pool: &'a SqlitePool,
    /// `None` when embeddings are disabled; heads are then left pending.
    pub provider: Option<&'a dyn EmbeddingProvider>,
}

impl SyncContext<'_> {
    /// Embed the changed chunks and drop the vectors of `stale` heads, inside
    /// the source's transaction. Returns the number of vectors written.
    ///
    /// A revision written and superseded within the same scan (a turn id
    /// repeated in one batch of log lines) is in both lists; it is not
    /// embedded.
    pub async fn apply_vectors(
        &self,
        conn: &mut SqliteConnection,
        to_embed: &[(String, String)],
        stale: &[String],
    ) -> SyncResult<usize> {
        index::remove(conn, stale).await?;
        let stale: HashSet<&str> = stale.iter().map(String::as_str).collect();
        let live: Vec<(String, String)> = to_embed
            .iter()
            .filter(|(id, _)| !stale.contains(id.as_str()))
            .cloned()
            .collect();
        match self.provider {
            Some(provider) if !live.is_empty() => {
                index::embed_and_store(conn, provider, self.config.embedding.batch_size, &live)
                    .await
            }
            _ => Ok(0),
        }
    }
}

/// Counters for one ingested source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Items (documents) or turns (logs) read.
    pub items: usize,
    /// New revisions written.
    pub changed: usize,
    /// Heads soft-deleted.
    pub deleted: usize,
    /// Vectors written.
    pub embedded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Ingested(ScanStats),
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ingested(ScanStats),
    Unchanged,
    Failed(String),
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ingested(s) => write!(
                f,
                "ingested (items={}, changed={}, deleted={}, embedded={})",
                s.items, s.changed, s.deleted, s.embedded
            ),
            SourceStatus::Unchanged => write!(f, "unchanged"),
            SourceStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
    /// The vector table was rebuilt for a new embedding width.
    pub rebuilt: bool,
    /// Vectors written for heads that had none before this run.
    pub backfilled: usize,
    /// Why the backfill stopped, if it did.
    pub backfill_error: Option<String>,
    /// Active heads still without a vector when the run finished.
    pub pending: usize,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, SourceStatus::Failed(_)))
            .count()
    }

    /// Every source ingested and every active head has a vector.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0 && self.pending == 0
    }
}

#[derive(Debug)]
pub enum RunStatus {
    Completed(SyncReport),
    /// Another process holds the lock; nothing was touched.
    Skipped,
}

/// Run one sync with the provider named in the config.
pub async fn run_sync(config: &Config, scope: SyncScope) -> Result<RunStatus> {
    let provider = if config.embedding.is_enabled() {
        Some(embedding::create_provider(&config.embedding)?)
    } else {
        None
    };
    run_sync_with_provider(config, scope, provider.as_deref()).await
}

/// Run one sync with an explicit provider (`None` leaves heads pending).
pub async fn run_sync_with_provider(
    config: &Config,
    scope: SyncScope,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<RunStatus> {
    let lock = lock::lock_for(config)?;
    let Some(_guard) = lock.try_acquire()? else {
        tracing::info!(lock = %lock.path().display(), "another sync holds the lock, skipping");
        return Ok(RunStatus::Skipped);
    };

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let mut report = SyncReport::default();
    if let Some(provider) = provider {
        report.rebuilt = index::ensure_dimension(&pool, provider.dims())
            .await
            .context("Failed to check embedding width")?;
    }

    let ctx = SyncContext {
        config,
        pool: &pool,
        provider,
    };

    if scope.documents() {
        for doc_cfg in &config.sources.documents {
            let path = config.resolve(&doc_cfg.path);
            let source = sources::canonical_source(config, &path);
            let status = match scan_notes::scan_document(&ctx, doc_cfg).await {
                Ok(outcome) => outcome.into(),
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "document failed");
                    SourceStatus::Failed(e.to_string())
                }
            };
            report.sources.push(SourceReport {
                source,
                kind: SourceKind::Document,
                status,
            });
        }
    }

    if scope.logs() {
        if let Some(logs) = &config.sources.logs {
            let dir = config.resolve(&logs.dir);
            let paths = match scan_log::discover_logs(logs, &dir) {
                Ok(paths) => paths,
                Err(e) => {
                    let source = sources::canonical_source(config, &dir);
                    tracing::warn!(source = %source, error = %e, "log discovery failed");
                    report.sources.push(SourceReport {
                        source,
                        kind: SourceKind::Log,
                        status: SourceStatus::Failed(format!("{:#}", e)),
                    });
                    Vec::new()
                }
            };
            for path in paths {
                let source = sources::canonical_source(config, &path);
                let status = match scan_log::scan_log(&ctx, &path).await {
                    Ok(outcome) => outcome.into(),
                    Err(e) => {
                        tracing::warn!(source = %source, error = %e, "log failed");
                        SourceStatus::Failed(e.to_string())
                    }
                };
                report.sources.push(SourceReport {
                    source,
                    kind: SourceKind::Log,
                    status,
                });
            }
        }
    }

    if let Some(provider) = provider {
        match index::backfill(&pool, provider, config.embedding.batch_size, None).await {
            Ok(n) => report.backfilled = n,
            Err(e) => {
                tracing::warn!(error = %e, "backfill failed");
                report.backfill_error = Some(e.to_string());
            }
        }
    }
    report.pending = index::pending_heads(&pool, None)
        .await
        .context("Failed to count pending heads")?
        .len();

    pool.close().await;
    Ok(RunStatus::Completed(report))
}

impl From<ScanOutcome> for SourceStatus {
    fn from(outcome: ScanOutcome) -> Self {
        match outcome {
            ScanOutcome::Ingested(stats) => SourceStatus::Ingested(stats),
            ScanOutcome::Unchanged => SourceStatus::Unchanged,
        }
    }
}

/// `memex sync`: run and print the per-source report.
pub async fn sync_cmd(config: &Config, scope: SyncScope) -> Result<()> {
    match run_sync(config, scope).await? {
        RunStatus::Skipped => {
            println!("skipped: another sync is running");
        }
        RunStatus::Completed(report) => {
            println!("sync");
            if report.rebuilt {
                println!("  vector table rebuilt for new embedding width");
            }
            for s in &report.sources {
                println!("  {} [{}]: {}", s.source, s.kind.as_str(), s.status);
            }
            if report.sources.is_empty() {
                println!("  no sources configured");
            }
            if config.embedding.is_enabled() {
                println!("  backfilled: {}", report.backfilled);
                if let Some(err) = &report.backfill_error {
                    println!("  backfill error: {}", err);
                }
            }
            println!("  failed: {}", report.failed());
            println!("  pending: {}", report.pending);
            if report.pending > 0 {
                println!(
                    "incomplete: {} heads without vectors (run `memex embed pending` once a provider is configured)",
                    report.pending
                );
            } else if report.failed() > 0 {
                println!("incomplete: {} sources failed", report.failed());
            } else {
                println!("ok");
            }
        }
    }
    Ok(())
}
