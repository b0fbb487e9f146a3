//! Core data models shared by the ledger, the scanners, and the ranker.
//!
//! A chunk is addressed by its [`ChunkIdentity`] and revised over time; every
//! stored revision is a [`ChunkRow`]. The maximum-revision row of an identity
//! is its head, and [`HeadState`] says whether that head is still live.

use std::fmt;

/// Chunk kind for conversation-log turns.
pub const KIND_TURN: &str = "turn";

/// Chunk kind for the metadata snapshot of a note document.
pub const KIND_DOCUMENT_META: &str = "document_meta";

/// Composite identity `(source, kind, key, seq)` of one revisioned chunk slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkIdentity {
    /// Canonical source path.
    pub source: String,
    /// Chunk kind, e.g. `memory_item` or `turn`.
    pub kind: String,
    /// Stable key within the source (item key or turn id).
    pub key: String,
    /// Sub-sequence number: 0 for note items, segment index for log turns.
    pub seq: i64,
}

impl ChunkIdentity {
    /// Build an identity from its four parts.
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        key: impl Into<String>,
        seq: i64,
    ) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            key: key.into(),
            seq,
        }
    }
}

impl fmt::Display for ChunkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}#{}", self.source, self.kind, self.key, self.seq)
    }
}

/// Liveness of an identity's head revision.
///
/// The head is the maximum-revision row whether or not it was soft-deleted,
/// so the revision number is carried in both states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    Active(i64),
    Deleted(i64),
}

impl HeadState {
    pub fn revision(&self) -> i64 {
        match self {
            HeadState::Active(rev) | HeadState::Deleted(rev) => *rev,
        }
    }

    /// True unless the head carries a soft-delete stamp.
    pub fn is_active(&self) -> bool {
        matches!(self, HeadState::Active(_))
    }
}

/// One stored revision of a chunk.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    /// Revisioned id, `c_<digest>.r<revision>`.
    pub id: String,
    pub identity: ChunkIdentity,
    pub revision: i64,
    pub content: String,
    pub content_hash: String,
    /// RFC 3339 timestamp of the last write or refresh.
    pub updated_at: String,
    /// RFC 3339 timestamp of the soft delete, if any.
    pub deleted_at: Option<String>,
}

impl ChunkRow {
    /// Liveness of this row when read as the head of its identity.
    pub fn state(&self) -> HeadState {
        match self.deleted_at {
            None => HeadState::Active(self.revision),
            Some(_) => HeadState::Deleted(self.revision),
        }
    }
}

/// Result of a ledger upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Id of the head after the upsert.
    pub chunk_id: String,
    pub revision: i64,
    /// True when a new revision was written and needs embedding.
    pub changed: bool,
    /// Previous head id replaced by this upsert, whose vector must go.
    pub superseded: Option<String>,
}

/// Which scanner owns a source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Full-rescan note document.
    Document,
    /// Append-only conversation log.
    Log,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Document => "document",
            SourceKind::Log => "log",
        }
    }

    /// Inverse of [`SourceKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(SourceKind::Document),
            "log" => Some(SourceKind::Log),
            _ => None,
        }
    }
}

/// Persisted scan state for one source.
#[derive(Debug, Clone)]
pub struct SourceState {
    pub source: String,
    pub kind: SourceKind,
    /// Stable sub-key, the file name.
    pub key: String,
    /// Item-set fingerprint (documents only).
    pub fingerprint: Option<String>,
    pub last_mtime: Option<String>,
    pub last_size: Option<i64>,
    /// Last consumed log sequence number (logs only).
    pub last_seq: Option<i64>,
    /// Byte offset just past the last consumed log line (logs only).
    pub last_offset: Option<i64>,
    pub updated_at: Option<String>,
}

/// A normalized `(key, text)` item extracted from a note document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteItem {
    pub key: String,
    pub text: String,
}
