//! Database statistics and health overview (`memex stats`).
//!
//! Besides counts, reports whether the vector table holds exactly one vector
//! per active head, which holds after every completed sync with embeddings
//! enabled.

use anyhow::Result;
use sqlx::SqlitePool;

use memex_core::rank::parse_timestamp;

use crate::config::Config;
use crate::db;
use crate::index;
use crate::migrate;
use crate::sources;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub sources: i64,
    /// Every stored revision.
    pub rows: i64,
    /// Distinct identities (one head each).
    pub heads: i64,
    pub active_heads: i64,
    pub vectors: i64,
    /// Active heads without a vector.
    pub pending: usize,
    /// Vectors whose id is not an active head.
    pub orphans: usize,
    pub embed_dims: Option<String>,
}

impl Stats {
    pub fn consistent(&self) -> bool {
        self.pending == 0 && self.orphans == 0
    }
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
        .fetch_one(pool)
        .await?;
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let heads: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT 1 FROM chunks GROUP BY source, kind, key, seq)",
    )
    .fetch_one(pool)
    .await?;
    let active_heads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_head")
        .fetch_one(pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vec_chunks")
        .fetch_one(pool)
        .await?;
    let embed_dims: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embed_dims'")
            .fetch_optional(pool)
            .await?;

    Ok(Stats {
        sources,
        rows,
        heads,
        active_heads,
        vectors,
        pending: index::pending_heads(pool, None).await?.len(),
        orphans: index::orphan_vectors(pool).await?.len(),
        embed_dims,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("memex stats");
    println!("===========");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Sources:       {}", stats.sources);
    println!("  Revisions:     {}", stats.rows);
    println!("  Heads:         {}", stats.heads);
    println!("  Active heads:  {}", stats.active_heads);
    println!("  Vectors:       {}", stats.vectors);
    println!(
        "  Vector width:  {}",
        stats.embed_dims.as_deref().unwrap_or("unset")
    );
    println!("  Pending:       {}", stats.pending);
    println!("  Orphans:       {}", stats.orphans);
    println!(
        "  Consistent:    {}",
        if stats.consistent() { "yes" } else { "no" }
    );

    let rows = sources::list_sources(&pool).await?;
    if !rows.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<36} {:<9} {:>8}   {}",
            "SOURCE", "KIND", "LAST SEQ", "LAST SYNC"
        );
        println!("  {}", "-".repeat(72));
        for s in &rows {
            let seq = s
                .last_seq
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            let when = s
                .updated_at
                .as_deref()
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<36} {:<9} {:>8}   {}",
                s.source,
                s.kind.as_str(),
                seq,
                when
            );
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Some(then) = parse_timestamp(ts) else {
        return ts.to_string();
    };
    let delta = (chrono::Utc::now() - then).num_seconds();

    if delta < 0 {
        then.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}
