//! review-query - Hybrid retrieval over game-review Q&A records
//!
//! This crate turns a question about one game into two scoped sub-queries
//! (nearest-neighbor over an embedding field and multi-field keyword
//! relevance), runs them in parallel and merges the two rankings with
//! Reciprocal Rank Fusion (RRF).
//!
//! # Features
//!
//! - Hybrid, vector-only and keyword-only retrieval
//! - Deterministic RRF with id tie-break
//! - Per-sub-query timeouts; a failed sub-query fails the whole call
//! - Caller-supplied query vectors skip embedding
//!
//! # Example
//!
//! ```rust,ignore
//! use review_query::QueryEngine;
//! use std::sync::Arc;
//!
//! let engine = QueryEngine::new(Arc::new(store), Arc::new(embedder), config.search);
//! let records = engine.retrieve("How is the performance?", "Cyberpunk 2077", 5).await?;
//! ```

mod engine;
mod executor;
mod fusion;
mod planner;

pub use engine::{QueryEngine, RetrievalRequest};
pub use fusion::{reciprocal_rank_fusion, rrf_contribution, RankingEntry};
pub use planner::{LogicalRequest, QueryPlan, QueryPlanner};

// Re-export for convenience
pub use review_core::{Record, RetrievedRecord, SearchMode, SearchResults};
