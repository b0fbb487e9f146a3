//! Chunk retrieval by id (`memex get`).
//!
//! Accepts either a revisioned id (`c_<digest>.r<n>`) or a bare base id, in
//! which case the identity's latest revision is used. Prints the identity and
//! its full revision history, soft-deleted revisions included.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqliteConnection;

use memex_core::chunk::parse_chunk_id;
use memex_core::models::ChunkRow;

use crate::config::Config;
use crate::db;
use crate::ledger;

#[derive(Debug, Clone, Serialize)]
pub struct RevisionResponse {
    pub id: String,
    pub rev: i64,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub source: String,
    pub kind: String,
    pub key: String,
    pub seq: i64,
    /// Id of the max revision, active or not.
    pub head: String,
    pub active: bool,
    pub revisions: Vec<RevisionResponse>,
}

async fn latest_for_base(conn: &mut SqliteConnection, base: &str) -> Result<Option<ChunkRow>> {
    // Exact prefix compare; `_` and `%` in `base` are literal.
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM chunks WHERE substr(id, 1, length(?) + 2) = ? || '.r'
         ORDER BY rev DESC LIMIT 1",
    )
    .bind(base)
    .bind(base)
    .fetch_optional(&mut *conn)
    .await?;
    match id {
        Some(id) => Ok(ledger::get_by_id(conn, &id).await?),
        None => Ok(None),
    }
}

/// Look up a chunk and its history.
pub async fn get_chunk(config: &Config, id: &str) -> Result<ChunkResponse> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;

    let found = if parse_chunk_id(id).is_some() {
        ledger::get_by_id(&mut conn, id).await?
    } else {
        latest_for_base(&mut conn, id).await?
    };
    let Some(row) = found else {
        drop(conn);
        pool.close().await;
        bail!("chunk not found: {}", id);
    };

    let revisions = ledger::history(&mut conn, &row.identity).await?;
    drop(conn);
    pool.close().await;

    let head = revisions.last().cloned().unwrap_or(row);
    Ok(ChunkResponse {
        source: head.identity.source.clone(),
        kind: head.identity.kind.clone(),
        key: head.identity.key.clone(),
        seq: head.identity.seq,
        head: head.id.clone(),
        active: head.state().is_active(),
        revisions: revisions
            .into_iter()
            .map(|r| RevisionResponse {
                id: r.id,
                rev: r.revision,
                updated_at: r.updated_at,
                deleted_at: r.deleted_at,
                content: r.content,
            })
            .collect(),
    })
}

/// CLI entry point: print the chunk as text or JSON.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let chunk = get_chunk(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunk)?);
        return Ok(());
    }

    println!("--- Chunk ---");
    println!("source:  {}", chunk.source);
    println!("kind:    {}", chunk.kind);
    println!("key:     {}", chunk.key);
    println!("seq:     {}", chunk.seq);
    println!(
        "head:    {} ({})",
        chunk.head,
        if chunk.active { "active" } else { "deleted" }
    );
    println!();

    println!("--- Revisions ({}) ---", chunk.revisions.len());
    for r in &chunk.revisions {
        match &r.deleted_at {
            Some(d) => println!("[r{}] {}  updated_at={}  deleted_at={}", r.rev, r.id, r.updated_at, d),
            None => println!("[r{}] {}  updated_at={}", r.rev, r.id, r.updated_at),
        }
        println!("{}", r.content);
        println!();
    }

    Ok(())
}
