//! # memex
//!
//! Local knowledge ingestion and hybrid retrieval.
//!
//! memex keeps two kinds of local text in one SQLite database: structured
//! note documents (TOML or JSON lists of short items, fully rescanned) and
//! append-only JSONL conversation logs (read incrementally from a stored
//! byte offset). Every chunk is revisioned: a changed item gets a new
//! revision, a vanished one is soft-deleted, and only the active head of an
//! identity carries an embedding vector.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Scanners   │──▶│    Ledger     │──▶│    SQLite     │
//! │ notes/logs  │   │ rev + vectors │   │ chunks + vecs │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                                  ┌─────────────────────┐
//!                                  │ rank (sim + recency) │
//!                                  │ select (TF-IDF+MMR)  │
//!                                  └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`lock`] | Single-writer advisory lock |
//! | [`ledger`] | Revision ledger over `chunks` |
//! | [`sources`] | Per-source scan state |
//! | [`scan_notes`] | Full-rescan note document scanner |
//! | [`scan_log`] | Append-only JSONL log scanner |
//! | [`index`] | Vector table for active heads |
//! | [`ingest`] | Sync run orchestration |
//! | [`search`] | Ranking and rendering |
//! | [`embedding`] | Embedding providers |
//! | [`db`] / [`migrate`] | Connection and schema |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod get;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod lock;
pub mod migrate;
pub mod scan_log;
pub mod scan_notes;
pub mod search;
pub mod sources;
pub mod stats;
