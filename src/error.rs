//! Per-source failure taxonomy for ingestion runs.

use thiserror::Error;

/// Why one source failed during a sync. The run itself goes on; the failed
/// source's transaction is rolled back and its prior state is kept.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Revision race on {0}: head moved twice during upsert")]
    RevisionRace(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Wrap a provider failure, keeping its full context chain.
    pub fn embedding(err: anyhow::Error) -> Self {
        SyncError::Embedding(format!("{:#}", err))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
