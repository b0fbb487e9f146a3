//! Embedding index over active head chunks (`vec_chunks`).
//!
//! Vectors are keyed by revisioned chunk id, so replacing a revision's vector
//! never touches another revision. Writes happen inside the caller's
//! per-source transaction; a rolled-back source leaves no vector behind.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use memex_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob, EmbeddingProvider};
use memex_core::store::{HeadCandidate, HeadIndex};

use crate::error::{SyncError, SyncResult};

const EMBED_DIMS_KEY: &str = "embed_dims";

/// Embed `items` (`(chunk_id, text)`) in batches of `batch_size` and replace
/// each id's vector. Returns the number of vectors written.
pub async fn embed_and_store(
    conn: &mut SqliteConnection,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    items: &[(String, String)],
) -> SyncResult<usize> {
    let mut written = 0;
    for batch in items.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = provider
            .embed(&texts)
            .await
            .map_err(SyncError::embedding)?;

        if vectors.len() != batch.len() {
            return Err(SyncError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }

        for ((id, _), vector) in batch.iter().zip(vectors.iter()) {
            if vector.len() != provider.dims() {
                return Err(SyncError::Embedding(format!(
                    "vector width {} does not match configured dims {}",
                    vector.len(),
                    provider.dims()
                )));
            }
            store_vector(conn, id, vector).await?;
            written += 1;
        }
    }
    Ok(written)
}

async fn store_vector(conn: &mut SqliteConnection, chunk_id: &str, vector: &[f32]) -> SyncResult<()> {
    sqlx::query("DELETE FROM vec_chunks WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO vec_chunks (chunk_id, embedding) VALUES (?, ?)")
        .bind(chunk_id)
        .bind(vec_to_blob(vector))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Delete the vectors of superseded or soft-deleted heads.
pub async fn remove(conn: &mut SqliteConnection, ids: &[String]) -> SyncResult<u64> {
    let mut removed = 0;
    for id in ids {
        removed += sqlx::query("DELETE FROM vec_chunks WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

/// Compare `width` with the recorded vector width. On a mismatch, or when no
/// width is recorded yet, drop and recreate the vector table, record the new
/// width and return `true`: every active head must then be re-embedded.
pub async fn ensure_dimension(pool: &SqlitePool, width: usize) -> SyncResult<bool> {
    let recorded: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(EMBED_DIMS_KEY)
        .fetch_optional(pool)
        .await?;

    if recorded.as_deref() == Some(width.to_string().as_str()) {
        return Ok(false);
    }

    tracing::info!(
        previous = recorded.as_deref().unwrap_or("none"),
        width,
        "embedding width changed, rebuilding vector table"
    );

    let mut tx = pool.begin().await?;
    sqlx::query("DROP TABLE IF EXISTS vec_chunks")
        .execute(&mut *tx)
        .await?;
    sqlx::query("CREATE TABLE vec_chunks (chunk_id TEXT PRIMARY KEY, embedding BLOB NOT NULL)")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(EMBED_DIMS_KEY)
    .bind(width.to_string())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(true)
}

/// Drop every vector so `backfill` re-embeds all active heads.
pub async fn clear(pool: &SqlitePool) -> SyncResult<u64> {
    Ok(sqlx::query("DELETE FROM vec_chunks")
        .execute(pool)
        .await?
        .rows_affected())
}

/// Active heads with no vector, as `(chunk_id, content)`.
pub async fn pending_heads(
    pool: &SqlitePool,
    limit: Option<usize>,
) -> SyncResult<Vec<(String, String)>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT h.id, h.content
        FROM chunks_head h
        LEFT JOIN vec_chunks v ON v.chunk_id = h.id
        WHERE v.chunk_id IS NULL
        ORDER BY h.updated_at DESC, h.id ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Embed pending heads, one transaction per batch. Returns vectors written.
pub async fn backfill(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    limit: Option<usize>,
) -> SyncResult<usize> {
    let pending = pending_heads(pool, limit).await?;
    let mut written = 0;
    for batch in pending.chunks(batch_size.max(1)) {
        let mut tx = pool.begin().await?;
        written += embed_and_store(&mut *tx, provider, batch_size, batch).await?;
        tx.commit().await?;
    }
    Ok(written)
}

/// Vector ids that are not active heads. Empty after every completed run.
pub async fn orphan_vectors(pool: &SqlitePool) -> SyncResult<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT v.chunk_id FROM vec_chunks v
         WHERE v.chunk_id NOT IN (SELECT id FROM chunks_head)
         ORDER BY v.chunk_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// [`HeadIndex`] over SQLite: brute-force cosine distance against every
/// active head's vector.
pub struct SqliteHeadIndex {
    pool: SqlitePool,
}

impl SqliteHeadIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HeadIndex for SqliteHeadIndex {
    async fn nearest_heads(&self, query_vec: &[f32], limit: usize) -> Result<Vec<HeadCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT h.id, h.source, h.kind, h.key, h.seq, h.updated_at, h.content, v.embedding
            FROM vec_chunks v
            JOIN chunks_head h ON h.id = v.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<HeadCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                HeadCandidate {
                    chunk_id: row.get("id"),
                    distance: cosine_distance(query_vec, &blob_to_vec(&blob)),
                    source: row.get("source"),
                    kind: row.get("kind"),
                    key: row.get("key"),
                    seq: row.get("seq"),
                    updated_at: row.get("updated_at"),
                    content: row.get("content"),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::migrate::apply_schema;
    use anyhow::bail;
    use memex_core::models::ChunkIdentity;
    use sqlx::sqlite::SqlitePoolOptions;

    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("fail")) {
                bail!("refused");
            }
            Ok(texts
                .iter()
                .map(|t| if t.starts_with('x') { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    async fn put(pool: &SqlitePool, key: &str, content: &str) -> String {
        let mut conn = pool.acquire().await.unwrap();
        let id = ChunkIdentity::new("notes.toml", "memory_item", key, 0);
        ledger::upsert_revision(&mut conn, &id, content, "2025-01-01T00:00:00Z")
            .await
            .unwrap()
            .chunk_id
    }

    #[tokio::test]
    async fn test_ensure_dimension_rebuilds_on_change() {
        let pool = pool().await;
        assert!(ensure_dimension(&pool, 2).await.unwrap());
        assert!(!ensure_dimension(&pool, 2).await.unwrap());
        assert!(ensure_dimension(&pool, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_backfill_then_nearest() {
        let pool = pool().await;
        let a = put(&pool, "a", "x marks the spot").await;
        let b = put(&pool, "b", "y is elsewhere").await;
        assert_eq!(pending_heads(&pool, None).await.unwrap().len(), 2);

        let written = backfill(&pool, &AxisProvider, 1, None).await.unwrap();
        assert_eq!(written, 2);
        assert!(pending_heads(&pool, None).await.unwrap().is_empty());

        let index = SqliteHeadIndex::new(pool.clone());
        let hits = index.nearest_heads(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, a);
        assert_eq!(hits[1].chunk_id, b);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_deleted_heads_are_not_returned() {
        let pool = pool().await;
        let a = put(&pool, "a", "x one").await;
        backfill(&pool, &AxisProvider, 8, None).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        ledger::soft_delete_missing(&mut conn, "notes.toml", "memory_item", &[], "t")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(orphan_vectors(&pool).await.unwrap(), vec![a.clone()]);
        let index = SqliteHeadIndex::new(pool.clone());
        assert!(index.nearest_heads(&[1.0, 0.0], 10).await.unwrap().is_empty());

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(remove(&mut conn, &[a]).await.unwrap(), 1);
        drop(conn);
        assert!(orphan_vectors(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_embedding_error() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let items = vec![("c_1.r1".to_string(), "fail".to_string())];
        let err = embed_and_store(&mut conn, &AxisProvider, 4, &items)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Embedding(_)));
    }
}
