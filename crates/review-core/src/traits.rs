//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::Result;
use crate::query::{KeywordQuery, ScopeFilter, VectorQuery};
use crate::types::{Record, SearchHit, Stats};

/// Document store holding the Q&A corpus.
///
/// Retrieval only reads; the write methods exist for corpus bootstrap.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fixed vector dimension of every record in this store.
    fn dimension(&self) -> usize;

    // Record operations

    /// Insert records, skipping any whose content hash already exists.
    /// Returns the number actually inserted.
    async fn insert_records(&self, records: &[Record]) -> Result<usize>;
    async fn get_record(&self, id: Ulid) -> Result<Option<Record>>;
    async fn list_records(&self, filter: &ScopeFilter, limit: u32, offset: u32) -> Result<Vec<Record>>;
    async fn list_by_app_id(&self, appid: &str, limit: u32) -> Result<Vec<Record>>;

    /// First `limit` records across every scope, oldest first.
    async fn list_all(&self, limit: u32) -> Result<Vec<Record>>;
    async fn delete_scope(&self, filter: &ScopeFilter) -> Result<u64>;

    // Scope operations
    async fn count_records(&self, filter: Option<&ScopeFilter>) -> Result<u64>;
    async fn list_scopes(&self) -> Result<Vec<(String, u64)>>;

    // Search operations

    /// Nearest neighbors in the filtered scope, best similarity first.
    async fn vector_search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>>;

    /// Free-text relevance in the filtered scope, best relevance first.
    async fn keyword_search(&self, query: &KeywordQuery) -> Result<Vec<SearchHit>>;

    // Stats
    async fn get_stats(&self, filter: Option<&ScopeFilter>) -> Result<Stats>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Count tokens in text.
    fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the maximum context length in tokens.
    fn max_tokens(&self) -> usize;
}
