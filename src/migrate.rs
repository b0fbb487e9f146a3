use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on a fresh database (`memex init`). Safe to re-run.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent DDL for every table and view. Also called on each sync so a
/// database created by an older build picks up missing objects.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per scanned file; never deleted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            key TEXT NOT NULL,
            fingerprint TEXT,
            last_mtime TEXT,
            last_size INTEGER,
            last_seq INTEGER,
            last_offset INTEGER,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every revision of every chunk identity.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            key TEXT NOT NULL,
            seq INTEGER NOT NULL,
            rev INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(source, kind, key, seq, rev)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vec_chunks (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Active heads: the max-revision row of each identity, when not deleted.
    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS chunks_head AS
        SELECT c.*
        FROM chunks c
        JOIN (
            SELECT source, kind, key, seq, MAX(rev) AS rev
            FROM chunks
            GROUP BY source, kind, key, seq
        ) h
          ON c.source = h.source AND c.kind = h.kind
         AND c.key = h.key AND c.seq = h.seq AND c.rev = h.rev
        WHERE c.deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_identity ON chunks(source, kind, key, seq)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_updated_at ON chunks(updated_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
