//! Retrieval facade for hybrid search.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use ulid::Ulid;

use review_core::{
    Embedder, Record, RetrievalStage, RetrievedRecord, Result, ReviewError, ScopeFilter,
    SearchConfig, SearchHit, SearchMode, SearchResults, Store, VectorField,
};

use crate::executor::{bounded, run_hybrid};
use crate::fusion::{reciprocal_rank_fusion, RankingEntry};
use crate::planner::{LogicalRequest, QueryPlanner};

/// A retrieval call with every knob exposed.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Free-text question.
    pub question: String,

    /// Game title to search within. Required.
    pub scope_key: Option<String>,

    /// Number of records to return (`default_num_results` if `None`).
    pub num_results: Option<u32>,

    pub mode: SearchMode,

    /// Vector field override (`vector_field` from config if `None`).
    pub vector_field: Option<VectorField>,

    /// Precomputed query embedding; skips the embedder.
    pub vector: Option<Vec<f32>>,
}

impl RetrievalRequest {
    /// Hybrid request with default settings.
    pub fn new(question: impl Into<String>, scope_key: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            scope_key: Some(scope_key.into()),
            num_results: None,
            mode: SearchMode::Hybrid,
            vector_field: None,
            vector: None,
        }
    }

    pub fn with_num_results(mut self, num_results: u32) -> Self {
        self.num_results = Some(num_results);
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_vector(mut self, field: VectorField, vector: Vec<f32>) -> Self {
        self.vector_field = Some(field);
        self.vector = Some(vector);
        self
    }
}

/// Hybrid retrieval engine.
///
/// Runs a scoped vector search and a scoped keyword search in parallel,
/// then fuses them using Reciprocal Rank Fusion (RRF). Holds no mutable
/// state, so one engine can serve concurrent calls.
pub struct QueryEngine<S, E> {
    /// Record store.
    store: Arc<S>,

    /// Embedding model.
    embedder: Arc<E>,

    planner: QueryPlanner,

    config: SearchConfig,
}

impl<S, E> QueryEngine<S, E>
where
    S: Store + 'static,
    E: Embedder,
{
    /// Create a new query engine.
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            planner: QueryPlanner::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Hybrid retrieval: the `num_results` most relevant records of one game.
    pub async fn retrieve(&self, question: &str, scope_key: &str, num_results: u32) -> Result<Vec<Record>> {
        let request = RetrievalRequest::new(question, scope_key).with_num_results(num_results);
        Ok(self.search(request).await?.into_records())
    }

    /// Hybrid retrieval with a precomputed query vector.
    pub async fn retrieve_with_vector(
        &self,
        question: &str,
        scope_key: &str,
        field: VectorField,
        vector: Vec<f32>,
        num_results: u32,
    ) -> Result<Vec<Record>> {
        let request = RetrievalRequest::new(question, scope_key)
            .with_num_results(num_results)
            .with_vector(field, vector);
        Ok(self.search(request).await?.into_records())
    }

    /// Nearest-neighbor retrieval only.
    pub async fn vector_only_search(
        &self,
        question: &str,
        scope_key: &str,
        num_results: u32,
    ) -> Result<SearchResults> {
        let request = RetrievalRequest::new(question, scope_key)
            .with_num_results(num_results)
            .with_mode(SearchMode::VectorOnly);
        self.search(request).await
    }

    /// Keyword retrieval only. Never touches the embedder.
    pub async fn keyword_only_search(
        &self,
        question: &str,
        scope_key: &str,
        num_results: u32,
    ) -> Result<SearchResults> {
        let request = RetrievalRequest::new(question, scope_key)
            .with_num_results(num_results)
            .with_mode(SearchMode::KeywordOnly);
        self.search(request).await
    }

    /// Run a retrieval request and keep ranking details.
    pub async fn search(&self, request: RetrievalRequest) -> Result<SearchResults> {
        let start = Instant::now();

        let RetrievalRequest {
            question,
            scope_key,
            num_results,
            mode,
            vector_field,
            vector,
        } = request;

        if question.trim().is_empty() {
            return Err(ReviewError::invalid_request("question must not be empty"));
        }
        let filter = ScopeFilter::new(scope_key.as_deref())?;
        let num_results = self.validate_num_results(num_results)?;
        let k = self.fetch_k(num_results);
        let field = vector_field.unwrap_or(self.config.vector_field);

        info!("Searching {:?} in {:?} ({:?})", question, filter.scope_key(), mode);

        let results = match mode {
            SearchMode::Hybrid => {
                let vector = self.query_vector(&question, &filter, field, vector).await?;
                let plan = self.planner.plan(LogicalRequest {
                    text: &question,
                    scope_key: Some(filter.scope_key()),
                    vector_field: field,
                    vector,
                    k,
                })?;

                let hits = run_hybrid(Arc::clone(&self.store), plan, self.sub_query_timeout()).await?;

                let vector_ids: Vec<Ulid> = hits.vector.iter().map(|h| h.id).collect();
                let keyword_ids: Vec<Ulid> = hits.keyword.iter().map(|h| h.id).collect();
                let fused = reciprocal_rank_fusion(&vector_ids, &keyword_ids, self.config.rrf_k);

                debug!("Fused to {} results", fused.len());

                let mut records: HashMap<Ulid, Record> = HashMap::new();
                for hit in hits.vector.into_iter().chain(hits.keyword) {
                    records.entry(hit.id).or_insert(hit.record);
                }

                self.materialize(fused, num_results, records, &filter).await?
            }
            SearchMode::VectorOnly => {
                let vector = self.query_vector(&question, &filter, field, vector).await?;
                let query = self.planner.vector_query(filter.clone(), field, vector, k)?;
                let hits = bounded(
                    RetrievalStage::VectorSearch,
                    filter.scope_key(),
                    field.column(),
                    self.sub_query_timeout(),
                    self.store.vector_search(&query),
                )
                .await?;
                single_list(hits, num_results, SearchMode::VectorOnly)
            }
            SearchMode::KeywordOnly => {
                let query = self.planner.keyword_query(filter.clone(), &question, k)?;
                let hits = bounded(
                    RetrievalStage::KeywordSearch,
                    filter.scope_key(),
                    &query.describe_fields(),
                    self.sub_query_timeout(),
                    self.store.keyword_search(&query),
                )
                .await?;
                single_list(hits, num_results, SearchMode::KeywordOnly)
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search completed in {}ms, returned {} results",
            latency_ms,
            results.len()
        );

        Ok(SearchResults {
            query: question,
            scope_key: filter.scope_key().to_string(),
            mode,
            total_results: results.len(),
            latency_ms,
            results,
        })
    }

    /// Point lookup by id.
    pub async fn get_record(&self, id: Ulid) -> Result<Record> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| ReviewError::RecordNotFound { id: id.to_string() })
    }

    /// Page through the records of one game in insertion order.
    pub async fn list_scope(&self, scope_key: &str, limit: u32, offset: u32) -> Result<Vec<Record>> {
        let filter = ScopeFilter::new(Some(scope_key))?;
        self.store.list_records(&filter, limit, offset).await
    }

    fn validate_num_results(&self, num_results: Option<u32>) -> Result<u32> {
        let n = num_results.unwrap_or(self.config.default_num_results);
        if n == 0 || n > self.config.max_num_results {
            return Err(ReviewError::invalid_request(format!(
                "num_results must be in [1, {}], got {}",
                self.config.max_num_results, n
            )));
        }
        Ok(n)
    }

    /// Sub-query window: wider than the final cut so fusion can reorder.
    fn fetch_k(&self, num_results: u32) -> u32 {
        num_results.saturating_mul(2).max(self.config.min_fetch_k)
    }

    fn sub_query_timeout(&self) -> Duration {
        Duration::from_millis(self.config.sub_query_timeout_ms)
    }

    /// Use the caller's vector when given, otherwise embed the question.
    async fn query_vector(
        &self,
        question: &str,
        filter: &ScopeFilter,
        field: VectorField,
        supplied: Option<Vec<f32>>,
    ) -> Result<Vec<f32>> {
        let dimension = self.store.dimension();

        if let Some(vector) = supplied {
            if vector.len() != dimension {
                return Err(ReviewError::invalid_request(format!(
                    "query vector has {} dimensions, store expects {}",
                    vector.len(),
                    dimension
                )));
            }
            return Ok(vector);
        }

        let limit = Duration::from_millis(self.config.embed_timeout_ms);
        let vector = match tokio::time::timeout(limit, self.embedder.embed(question)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                return Err(ReviewError::unavailable(
                    RetrievalStage::Embedding,
                    filter.scope_key(),
                    field.column(),
                    e,
                ))
            }
            Err(_) => {
                return Err(ReviewError::unavailable(
                    RetrievalStage::Embedding,
                    filter.scope_key(),
                    field.column(),
                    format!("timed out after {}ms", limit.as_millis()),
                ))
            }
        };

        if vector.len() != dimension {
            return Err(ReviewError::DimensionMismatch {
                field: field.column().to_string(),
                expected: dimension,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }

    /// Attach records to the top fused entries, in fused order.
    async fn materialize(
        &self,
        fused: Vec<RankingEntry>,
        num_results: u32,
        mut records: HashMap<Ulid, Record>,
        filter: &ScopeFilter,
    ) -> Result<Vec<RetrievedRecord>> {
        let mut results = Vec::with_capacity(fused.len().min(num_results as usize));

        for entry in fused.into_iter().take(num_results as usize) {
            let record = match records.remove(&entry.id) {
                Some(record) => record,
                None => {
                    let fetched = self.store.get_record(entry.id).await.map_err(|e| {
                        ReviewError::unavailable(
                            RetrievalStage::Fetch,
                            filter.scope_key(),
                            entry.id.to_string(),
                            e,
                        )
                    })?;
                    match fetched {
                        Some(record) => record,
                        None => {
                            warn!("Record {} vanished before it could be fetched", entry.id);
                            continue;
                        }
                    }
                }
            };

            results.push(RetrievedRecord {
                rank: results.len() as u32 + 1,
                score: entry.score,
                vector_rank: entry.vector_rank,
                keyword_rank: entry.keyword_rank,
                record,
            });
        }

        Ok(results)
    }
}

/// Rank a single sub-query's hits, first occurrence of each id only.
fn single_list(hits: Vec<SearchHit>, num_results: u32, mode: SearchMode) -> Vec<RetrievedRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();

    for (i, hit) in hits.into_iter().enumerate() {
        if results.len() >= num_results as usize {
            break;
        }
        if !seen.insert(hit.id) {
            continue;
        }
        let list_rank = Some(i as u32 + 1);
        let (vector_rank, keyword_rank) = match mode {
            SearchMode::KeywordOnly => (None, list_rank),
            _ => (list_rank, None),
        };
        results.push(RetrievedRecord {
            rank: results.len() as u32 + 1,
            score: hit.score as f64,
            vector_rank,
            keyword_rank,
            record: hit.record,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use review_core::{KeywordQuery, RecordVectors, ReviewProvenance, Stats, VectorQuery};

    const DIM: usize = 4;

    fn record(n: u128, question: &str) -> Record {
        let mut record = Record::new(
            "Hades",
            question,
            "answer",
            "gameplay",
            RecordVectors::zeros(DIM),
            ReviewProvenance::default(),
        );
        record.id = Ulid::from(n);
        record
    }

    fn hits(records: &[Record]) -> Vec<SearchHit> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| SearchHit {
                id: r.id,
                score: 1.0 / (i as f32 + 1.0),
                record: r.clone(),
            })
            .collect()
    }

    /// Store returning canned hit lists, with optional delays and failures.
    #[derive(Default)]
    struct ScriptedStore {
        vector_hits: Vec<SearchHit>,
        keyword_hits: Vec<SearchHit>,
        vector_delay: Option<Duration>,
        keyword_delay: Option<Duration>,
        vector_fails: bool,
        keyword_fails: bool,
        vector_calls: AtomicUsize,
        keyword_calls: AtomicUsize,
        // Searches that ran to the end
        vector_done: AtomicUsize,
        keyword_done: AtomicUsize,
    }

    #[async_trait]
    impl Store for ScriptedStore {
        fn dimension(&self) -> usize {
            DIM
        }

        async fn insert_records(&self, records: &[Record]) -> Result<usize> {
            Ok(records.len())
        }

        async fn get_record(&self, id: Ulid) -> Result<Option<Record>> {
            Ok(self
                .vector_hits
                .iter()
                .chain(&self.keyword_hits)
                .find(|h| h.id == id)
                .map(|h| h.record.clone()))
        }

        async fn list_records(&self, _: &ScopeFilter, _: u32, _: u32) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn list_by_app_id(&self, _: &str, _: u32) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn list_all(&self, _: u32) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn delete_scope(&self, _: &ScopeFilter) -> Result<u64> {
            Ok(0)
        }

        async fn count_records(&self, _: Option<&ScopeFilter>) -> Result<u64> {
            Ok(0)
        }

        async fn list_scopes(&self) -> Result<Vec<(String, u64)>> {
            Ok(Vec::new())
        }

        async fn vector_search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
            self.vector_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.vector_delay {
                tokio::time::sleep(delay).await;
            }
            self.vector_done.fetch_add(1, Ordering::SeqCst);
            if self.vector_fails {
                return Err(ReviewError::database("index offline"));
            }
            Ok(self.vector_hits.iter().take(query.k() as usize).cloned().collect())
        }

        async fn keyword_search(&self, query: &KeywordQuery) -> Result<Vec<SearchHit>> {
            self.keyword_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.keyword_delay {
                tokio::time::sleep(delay).await;
            }
            self.keyword_done.fetch_add(1, Ordering::SeqCst);
            if self.keyword_fails {
                return Err(ReviewError::database("fts offline"));
            }
            Ok(self.keyword_hits.iter().take(query.k() as usize).cloned().collect())
        }

        async fn get_stats(&self, _: Option<&ScopeFilter>) -> Result<Stats> {
            Ok(Stats {
                records: 0,
                scopes: 0,
                dimension: DIM,
                storage_bytes: 0,
                filter: None,
            })
        }
    }

    /// Embedder that counts calls and returns a fixed vector.
    struct FixedEmbedder {
        calls: AtomicUsize,
        dimension: usize,
    }

    impl FixedEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dimension,
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; self.dimension])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }

        fn count_tokens(&self, text: &str) -> Result<usize> {
            Ok(text.split_whitespace().count())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn max_tokens(&self) -> usize {
            512
        }
    }

    fn engine(store: ScriptedStore) -> QueryEngine<ScriptedStore, FixedEmbedder> {
        QueryEngine::new(
            Arc::new(store),
            Arc::new(FixedEmbedder::new(DIM)),
            SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_record_in_both_lists_ranks_first() {
        let a = record(1, "Is the combat fun?");
        let b = record(2, "How is the combat?");
        let c = record(3, "Any bugs?");

        // A: vector rank 1, keyword rank 3. B: vector rank 2, keyword rank 1.
        let store = ScriptedStore {
            vector_hits: hits(&[a.clone(), b.clone()]),
            keyword_hits: hits(&[b.clone(), c.clone(), a.clone()]),
            ..Default::default()
        };
        let engine = engine(store);

        let results = engine
            .search(RetrievalRequest::new("combat", "Hades"))
            .await
            .unwrap();

        assert_eq!(results.mode, SearchMode::Hybrid);
        assert_eq!(results.results[0].record.id, b.id);
        assert_eq!(results.results[1].record.id, a.id);
        assert!((results.results[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((results.results[1].score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
        assert_eq!(results.results[1].vector_rank, Some(1));
        assert_eq!(results.results[1].keyword_rank, Some(3));
        assert_eq!(results.results[2].record.id, c.id);
        assert_eq!(results.results[2].vector_rank, None);
    }

    #[tokio::test]
    async fn test_retrieve_truncates_and_is_idempotent() {
        let records: Vec<Record> = (1..=8).map(|n| record(n, "question")).collect();
        let store = ScriptedStore {
            vector_hits: hits(&records),
            keyword_hits: hits(&records.iter().rev().cloned().collect::<Vec<_>>()),
            ..Default::default()
        };
        let engine = engine(store);

        let first = engine.retrieve("question", "Hades", 3).await.unwrap();
        let second = engine.retrieve("question", "Hades", 3).await.unwrap();

        assert_eq!(first.len(), 3);
        let ids = |rs: &[Record]| rs.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_fewer_matches_than_requested() {
        let store = ScriptedStore {
            vector_hits: hits(&[record(1, "a"), record(2, "b")]),
            keyword_hits: hits(&[record(2, "b")]),
            ..Default::default()
        };
        let engine = engine(store);

        let records = engine.retrieve("question", "Hades", 50).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_scope_returns_empty() {
        let engine = engine(ScriptedStore::default());

        let records = engine.retrieve("question", "Unknown Game", 5).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let engine = engine(ScriptedStore::default());

        let err = engine.retrieve("   ", "Hades", 5).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let err = engine.retrieve("question", "Hades", 0).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let err = engine.retrieve("question", "Hades", 101).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let mut request = RetrievalRequest::new("question", "Hades");
        request.scope_key = None;
        let err = engine.search(request).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let err = engine.retrieve("question", "", 5).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_vector_timeout_fails_whole_call() {
        let store = ScriptedStore {
            vector_hits: hits(&[record(1, "a")]),
            keyword_hits: hits(&[record(2, "b")]),
            vector_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let config = SearchConfig {
            sub_query_timeout_ms: 50,
            ..SearchConfig::default()
        };
        let engine = QueryEngine::new(Arc::new(store), Arc::new(FixedEmbedder::new(DIM)), config);

        let err = engine.retrieve("question", "Hades", 5).await.unwrap_err();
        match err {
            ReviewError::RetrievalUnavailable {
                stage, scope_key, ..
            } => {
                assert_eq!(stage, RetrievalStage::VectorSearch);
                assert_eq!(scope_key, "Hades");
            }
            other => panic!("expected RetrievalUnavailable, got {:?}", other),
        }
        assert!(engine.retrieve("question", "Hades", 5).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_dropping_retrieval_cancels_both_sub_queries() {
        let store = Arc::new(ScriptedStore {
            vector_hits: hits(&[record(1, "a")]),
            keyword_hits: hits(&[record(2, "b")]),
            vector_delay: Some(Duration::from_millis(300)),
            keyword_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(FixedEmbedder::new(DIM)),
            SearchConfig::default(),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            engine.retrieve("question", "Hades", 5),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.keyword_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.vector_done.load(Ordering::SeqCst), 0);
        assert_eq!(store.keyword_done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keyword_failure_fails_whole_call() {
        let store = ScriptedStore {
            vector_hits: hits(&[record(1, "a")]),
            keyword_fails: true,
            ..Default::default()
        };
        let engine = engine(store);

        let err = engine.retrieve("question", "Hades", 5).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::RetrievalUnavailable {
                stage: RetrievalStage::KeywordSearch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_vector_failure_names_field() {
        let store = ScriptedStore {
            vector_fails: true,
            ..Default::default()
        };
        let engine = engine(store);

        let err = engine.retrieve("question", "Hades", 5).await.unwrap_err();
        match err {
            ReviewError::RetrievalUnavailable { stage, field, .. } => {
                assert_eq!(stage, RetrievalStage::VectorSearch);
                assert_eq!(field, "question_answer_vector");
            }
            other => panic!("expected RetrievalUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_supplied_vector_skips_embedding() {
        let embedder = Arc::new(FixedEmbedder::new(DIM));
        let engine = QueryEngine::new(
            Arc::new(ScriptedStore {
                vector_hits: hits(&[record(1, "a")]),
                ..Default::default()
            }),
            Arc::clone(&embedder),
            SearchConfig::default(),
        );

        let records = engine
            .retrieve_with_vector("question", "Hades", VectorField::Question, vec![1.0; DIM], 5)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

        let err = engine
            .retrieve_with_vector("question", "Hades", VectorField::Question, vec![1.0; 3], 5)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_single_signal_modes() {
        let a = record(1, "a");
        let b = record(2, "b");
        let embedder = Arc::new(FixedEmbedder::new(DIM));
        let engine = QueryEngine::new(
            Arc::new(ScriptedStore {
                vector_hits: hits(&[a.clone(), b.clone()]),
                keyword_hits: hits(&[b.clone()]),
                ..Default::default()
            }),
            Arc::clone(&embedder),
            SearchConfig::default(),
        );

        let vector = engine.vector_only_search("question", "Hades", 5).await.unwrap();
        assert_eq!(vector.mode, SearchMode::VectorOnly);
        assert_eq!(vector.total_results, 2);
        assert_eq!(vector.results[0].record.id, a.id);
        assert_eq!(vector.results[0].vector_rank, Some(1));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let keyword = engine.keyword_only_search("question", "Hades", 5).await.unwrap();
        assert_eq!(keyword.mode, SearchMode::KeywordOnly);
        assert_eq!(keyword.total_results, 1);
        assert_eq!(keyword.results[0].keyword_rank, Some(1));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sub_query_window() {
        let store = Arc::new(ScriptedStore::default());
        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(FixedEmbedder::new(DIM)),
            SearchConfig::default(),
        );

        assert_eq!(engine.fetch_k(5), 20);
        assert_eq!(engine.fetch_k(30), 60);

        engine.retrieve("question", "Hades", 5).await.unwrap();
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.keyword_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedder_dimension_mismatch() {
        let engine = QueryEngine::new(
            Arc::new(ScriptedStore::default()),
            Arc::new(FixedEmbedder::new(8)),
            SearchConfig::default(),
        );

        let err = engine.retrieve("question", "Hades", 5).await.unwrap_err();
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
    }

    #[tokio::test]
    async fn test_get_record_not_found() {
        let a = record(1, "a");
        let engine = engine(ScriptedStore {
            vector_hits: hits(&[a.clone()]),
            ..Default::default()
        });

        assert_eq!(engine.get_record(a.id).await.unwrap().id, a.id);
        let err = engine.get_record(Ulid::from(99u128)).await.unwrap_err();
        assert_eq!(err.error_code(), "RECORD_NOT_FOUND");
    }
}
