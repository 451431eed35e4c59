//! review-store - SQLite storage layer
//!
//! This crate persists Q&A records with their three embeddings and serves
//! scope-filtered cosine search (via a registered SQL function) and FTS5
//! keyword search.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{SCHEMA, SCHEMA_VERSION};
