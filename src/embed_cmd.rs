//! `memex embed pending` and `memex embed rebuild`.
//!
//! Both write vectors, so both take the sync lock and skip when another
//! writer holds it.

use anyhow::{bail, Result};

use memex_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index;
use crate::lock;
use crate::migrate;

fn provider_for(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    embedding::create_provider(&config.embedding)
}

/// Embed active heads that have no vector yet.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    let provider = provider_for(config)?;
    let lock = lock::lock_for(config)?;
    let Some(_guard) = lock.try_acquire()? else {
        println!("skipped: another sync is running");
        return Ok(());
    };

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    if dry_run {
        let pending = index::pending_heads(&pool, limit).await?;
        println!("embed pending (dry-run)");
        println!("  heads needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let rebuilt = index::ensure_dimension(&pool, provider.dims()).await?;
    let embedded = index::backfill(
        &pool,
        provider.as_ref(),
        config.embedding.batch_size,
        limit,
    )
    .await?;
    let remaining = index::pending_heads(&pool, None).await?.len();

    println!("embed pending");
    if rebuilt {
        println!("  vector table rebuilt for new embedding width");
    }
    println!("  embedded: {}", embedded);
    println!("  remaining: {}", remaining);

    pool.close().await;
    Ok(())
}

/// Drop every vector and re-embed all active heads.
pub async fn run_embed_rebuild(config: &Config) -> Result<()> {
    let provider = provider_for(config)?;
    let lock = lock::lock_for(config)?;
    let Some(_guard) = lock.try_acquire()? else {
        println!("skipped: another sync is running");
        return Ok(());
    };

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    index::ensure_dimension(&pool, provider.dims()).await?;
    let cleared = index::clear(&pool).await?;
    println!("embed rebuild: cleared {} vectors", cleared);

    let embedded =
        index::backfill(&pool, provider.as_ref(), config.embedding.batch_size, None).await?;
    println!("  embedded: {}", embedded);

    pool.close().await;
    Ok(())
}
