//! Source rows: per-file scan state that survives between runs.
//!
//! Documents persist a fingerprint of their item set; logs persist the byte
//! offset and sequence number of the last consumed line. Rows are created on
//! first scan and never deleted.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;

use memex_core::models::{SourceKind, SourceState};

use crate::config::Config;
use crate::error::SyncResult;

fn row_to_state(row: &SqliteRow) -> SourceState {
    let kind: String = row.get("kind");
    SourceState {
        source: row.get("source"),
        kind: SourceKind::parse(&kind).unwrap_or(SourceKind::Document),
        key: row.get("key"),
        fingerprint: row.get("fingerprint"),
        last_mtime: row.get("last_mtime"),
        last_size: row.get("last_size"),
        last_seq: row.get("last_seq"),
        last_offset: row.get("last_offset"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn get_source(conn: &mut SqliteConnection, source: &str) -> SyncResult<Option<SourceState>> {
    let row = sqlx::query("SELECT * FROM sources WHERE source = ?")
        .bind(source)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(row_to_state))
}

pub async fn list_sources(pool: &SqlitePool) -> SyncResult<Vec<SourceState>> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY source")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_state).collect())
}

/// Insert or update a source row. `updated_at` is always set to now.
///
/// Fields a scanner does not own stay untouched on update: documents never
/// overwrite `last_seq`/`last_offset` and logs never overwrite `fingerprint`.
pub async fn upsert_source(conn: &mut SqliteConnection, state: &SourceState) -> SyncResult<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO sources (source, kind, key, fingerprint, last_mtime, last_size, last_seq, last_offset, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET
            kind = excluded.kind,
            key = excluded.key,
            fingerprint = COALESCE(excluded.fingerprint, sources.fingerprint),
            last_mtime = excluded.last_mtime,
            last_size = excluded.last_size,
            last_seq = COALESCE(excluded.last_seq, sources.last_seq),
            last_offset = COALESCE(excluded.last_offset, sources.last_offset),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&state.source)
    .bind(state.kind.as_str())
    .bind(&state.key)
    .bind(&state.fingerprint)
    .bind(&state.last_mtime)
    .bind(state.last_size)
    .bind(state.last_seq)
    .bind(state.last_offset)
    .bind(&now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Canonical name of a scanned file under `[sources] source_style`.
///
/// `rel` gives the root-relative path with forward slashes (falling back to
/// the full path outside the root); `base` gives the file name.
pub fn canonical_source(config: &Config, path: &Path) -> String {
    if config.sources.source_style == "base" {
        if let Some(name) = path.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }
    match path.strip_prefix(&config.sources.root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// File name used as the source row's stable sub-key.
pub fn source_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Modification time of `meta` as RFC 3339 UTC.
pub fn mtime_rfc3339(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_else(|_| Utc::now().to_rfc3339())
}
