//! # memex core
//!
//! Storage-agnostic logic for memex: chunk identity and revision models,
//! content hashing and text segmentation, the head-index store trait, the
//! hybrid similarity/recency ranker, and the TF-IDF + MMR salient sentence
//! selector.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The application
//! crate supplies a SQLite-backed [`store::HeadIndex`] and an embedding
//! provider, and calls into [`rank`] and [`select`].

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod rank;
pub mod select;
pub mod store;
pub mod text;
pub mod tfidf;
