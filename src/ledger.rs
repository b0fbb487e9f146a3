//! Revision ledger over the `chunks` table.
//!
//! Every write for an identity either refreshes its head's timestamp (same
//! content) or appends revision `head + 1`. Rows are never rewritten beyond
//! that timestamp and the soft-delete stamp, so the full history stays
//! readable through [`history`].
//!
//! All functions take a connection so the caller can run them inside its
//! per-source transaction (`&mut *tx`).

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use memex_core::chunk::{chunk_id, hash_text};
use memex_core::models::{ChunkIdentity, ChunkRow, UpsertOutcome};

use crate::error::{SyncError, SyncResult};

const CHUNK_COLUMNS: &str =
    "id, source, kind, key, seq, rev, content, content_hash, updated_at, deleted_at";

/// A head-only filter for `UPDATE chunks`: the row is the max revision of
/// its identity.
const IS_HEAD: &str = "rev = (SELECT MAX(rev) FROM chunks c2
                      WHERE c2.source = chunks.source AND c2.kind = chunks.kind
                        AND c2.key = chunks.key AND c2.seq = chunks.seq)";

fn row_to_chunk(row: &SqliteRow) -> ChunkRow {
    ChunkRow {
        id: row.get("id"),
        identity: ChunkIdentity {
            source: row.get("source"),
            kind: row.get("kind"),
            key: row.get("key"),
            seq: row.get("seq"),
        },
        revision: row.get("rev"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

/// The max-revision row of `identity`, active or soft-deleted.
pub async fn get_head(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
) -> SyncResult<Option<ChunkRow>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM chunks
         WHERE source = ? AND kind = ? AND key = ? AND seq = ?
         ORDER BY rev DESC LIMIT 1",
        CHUNK_COLUMNS
    ))
    .bind(&identity.source)
    .bind(&identity.kind)
    .bind(&identity.key)
    .bind(identity.seq)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(row_to_chunk))
}

/// Every revision of `identity`, oldest first.
pub async fn history(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
) -> SyncResult<Vec<ChunkRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM chunks
         WHERE source = ? AND kind = ? AND key = ? AND seq = ?
         ORDER BY rev ASC",
        CHUNK_COLUMNS
    ))
    .bind(&identity.source)
    .bind(&identity.kind)
    .bind(&identity.key)
    .bind(identity.seq)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(row_to_chunk).collect())
}

/// Look up one stored revision by its id.
pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> SyncResult<Option<ChunkRow>> {
    let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(row_to_chunk))
}

enum Attempt {
    Done(UpsertOutcome),
    Raced,
}

/// Write `content` for `identity` at timestamp `ts`.
///
/// - no head: insert revision 1
/// - head soft-deleted or content hash differs: insert `head + 1`
/// - otherwise refresh the head's `updated_at` and report `changed = false`
///
/// If the max revision moves between the read and the insert, or the insert
/// hits the uniqueness constraint, the whole read-modify-write is retried
/// once before failing with [`SyncError::RevisionRace`].
pub async fn upsert_revision(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
    content: &str,
    ts: &str,
) -> SyncResult<UpsertOutcome> {
    let content_hash = hash_text(content);
    for attempt in 0..2 {
        match try_upsert(conn, identity, content, &content_hash, ts).await? {
            Attempt::Done(outcome) => return Ok(outcome),
            Attempt::Raced => {
                tracing::warn!(identity = %identity, attempt, "revision moved during upsert");
            }
        }
    }
    Err(SyncError::RevisionRace(identity.to_string()))
}

async fn try_upsert(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
    content: &str,
    content_hash: &str,
    ts: &str,
) -> SyncResult<Attempt> {
    let head = get_head(conn, identity).await?;

    if let Some(head) = &head {
        if head.deleted_at.is_none() && head.content_hash == content_hash {
            sqlx::query("UPDATE chunks SET updated_at = ? WHERE id = ?")
                .bind(ts)
                .bind(&head.id)
                .execute(&mut *conn)
                .await?;
            return Ok(Attempt::Done(UpsertOutcome {
                chunk_id: head.id.clone(),
                revision: head.revision,
                changed: false,
                superseded: None,
            }));
        }
    }

    insert_next(conn, identity, head, content, content_hash, ts).await
}

/// Append the revision after `seen`, provided it is still the max revision.
async fn insert_next(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
    seen: Option<ChunkRow>,
    content: &str,
    content_hash: &str,
    ts: &str,
) -> SyncResult<Attempt> {
    let seen_rev = seen.as_ref().map(|h| h.revision).unwrap_or(0);
    let current_rev: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(rev) FROM chunks WHERE source = ? AND kind = ? AND key = ? AND seq = ?",
    )
    .bind(&identity.source)
    .bind(&identity.kind)
    .bind(&identity.key)
    .bind(identity.seq)
    .fetch_one(&mut *conn)
    .await?;
    if current_rev.unwrap_or(0) != seen_rev {
        return Ok(Attempt::Raced);
    }

    let revision = seen_rev + 1;
    let id = chunk_id(identity, revision);
    let inserted = sqlx::query(
        "INSERT INTO chunks (id, source, kind, key, seq, rev, content, content_hash, updated_at, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
    )
    .bind(&id)
    .bind(&identity.source)
    .bind(&identity.kind)
    .bind(&identity.key)
    .bind(identity.seq)
    .bind(revision)
    .bind(content)
    .bind(content_hash)
    .bind(ts)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(Attempt::Raced),
        Err(e) => return Err(e.into()),
    }

    // A deleted head already lost its vector; only a live one is superseded.
    let superseded = seen.filter(|h| h.deleted_at.is_none()).map(|h| h.id);

    Ok(Attempt::Done(UpsertOutcome {
        chunk_id: id,
        revision,
        changed: true,
        superseded,
    }))
}

/// Soft-delete every active head under `(source, kind)` whose key is not in
/// `keep_keys`. Returns the ids that were newly stamped.
pub async fn soft_delete_missing(
    conn: &mut SqliteConnection,
    source: &str,
    kind: &str,
    keep_keys: &[String],
    ts: &str,
) -> SyncResult<Vec<String>> {
    let heads: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT id, key FROM chunks
         WHERE source = ? AND kind = ? AND deleted_at IS NULL AND {}",
        IS_HEAD
    ))
    .bind(source)
    .bind(kind)
    .fetch_all(&mut *conn)
    .await?;

    let keep: std::collections::HashSet<&str> = keep_keys.iter().map(|k| k.as_str()).collect();
    let mut deleted = Vec::new();
    for (id, key) in heads {
        if keep.contains(key.as_str()) {
            continue;
        }
        stamp_deleted(conn, &id, ts).await?;
        deleted.push(id);
    }
    Ok(deleted)
}

/// Soft-delete every active head of `(source, kind)`; used on log truncation.
pub async fn soft_delete_source(
    conn: &mut SqliteConnection,
    source: &str,
    kind: &str,
    ts: &str,
) -> SyncResult<Vec<String>> {
    soft_delete_missing(conn, source, kind, &[], ts).await
}

/// Soft-delete the head of one identity if it is active.
pub async fn soft_delete_identity(
    conn: &mut SqliteConnection,
    identity: &ChunkIdentity,
    ts: &str,
) -> SyncResult<Option<String>> {
    match get_head(conn, identity).await? {
        Some(head) if head.deleted_at.is_none() => {
            stamp_deleted(conn, &head.id, ts).await?;
            Ok(Some(head.id))
        }
        _ => Ok(None),
    }
}

async fn stamp_deleted(conn: &mut SqliteConnection, id: &str, ts: &str) -> SyncResult<()> {
    sqlx::query("UPDATE chunks SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(ts)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
