//! Parallel execution of the planned sub-queries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::debug;

use review_core::{RetrievalStage, Result, ReviewError, SearchHit, Store};

use crate::planner::QueryPlan;

enum Branch {
    Vector,
    Keyword,
}

/// Hits of both sub-queries, each in store order.
pub(crate) struct HybridHits {
    pub vector: Vec<SearchHit>,
    pub keyword: Vec<SearchHit>,
}

/// Run both sub-queries as independent tasks.
///
/// The first failure is returned immediately; dropping the `JoinSet` aborts
/// the sibling task. Dropping the returned future aborts both.
pub(crate) async fn run_hybrid<S>(store: Arc<S>, plan: QueryPlan, limit: Duration) -> Result<HybridHits>
where
    S: Store + 'static,
{
    let QueryPlan { vector, keyword } = plan;
    let scope = vector.filter().scope_key().to_string();
    let mut tasks = JoinSet::new();

    {
        let store = Arc::clone(&store);
        let scope = scope.clone();
        tasks.spawn(async move {
            let field = vector.field().column();
            let hits = bounded(
                RetrievalStage::VectorSearch,
                &scope,
                field,
                limit,
                store.vector_search(&vector),
            )
            .await;
            (Branch::Vector, hits)
        });
    }

    {
        let store = Arc::clone(&store);
        let scope = scope.clone();
        tasks.spawn(async move {
            let fields = keyword.describe_fields();
            let hits = bounded(
                RetrievalStage::KeywordSearch,
                &scope,
                &fields,
                limit,
                store.keyword_search(&keyword),
            )
            .await;
            (Branch::Keyword, hits)
        });
    }

    let mut vector_hits = None;
    let mut keyword_hits = None;

    while let Some(joined) = tasks.join_next().await {
        let (branch, hits) =
            joined.map_err(|e| ReviewError::internal(format!("Sub-query task failed: {}", e)))?;
        match branch {
            Branch::Vector => vector_hits = Some(hits?),
            Branch::Keyword => keyword_hits = Some(hits?),
        }
    }

    let (vector, keyword) = vector_hits
        .zip(keyword_hits)
        .ok_or_else(|| ReviewError::internal("Sub-query finished without a result"))?;

    debug!(
        "Vector search returned {} results, keyword search returned {} results",
        vector.len(),
        keyword.len()
    );

    Ok(HybridHits { vector, keyword })
}

/// Apply the sub-query timeout and attach retrieval context to any failure.
pub(crate) async fn bounded<F>(
    stage: RetrievalStage,
    scope_key: &str,
    field: &str,
    limit: Duration,
    query: F,
) -> Result<Vec<SearchHit>>
where
    F: Future<Output = Result<Vec<SearchHit>>>,
{
    match tokio::time::timeout(limit, query).await {
        Ok(Ok(hits)) => Ok(hits),
        Ok(Err(e)) => Err(ReviewError::unavailable(stage, scope_key, field, e)),
        Err(_) => Err(ReviewError::unavailable(
            stage,
            scope_key,
            field,
            format!("timed out after {}ms", limit.as_millis()),
        )),
    }
}
