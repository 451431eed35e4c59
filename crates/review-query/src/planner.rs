//! Builds the two scoped sub-queries for one retrieval call.

use review_core::{
    FieldWeight, KeywordQuery, MultiMatchMode, Result, ScopeFilter, SearchConfig, VectorField,
    VectorQuery,
};

/// Logical retrieval request, before it is split into sub-queries.
#[derive(Debug, Clone)]
pub struct LogicalRequest<'a> {
    /// Free-text question.
    pub text: &'a str,

    /// Game title every sub-query is confined to.
    pub scope_key: Option<&'a str>,

    /// Embedding field searched by the vector sub-query.
    pub vector_field: VectorField,

    /// Query embedding.
    pub vector: Vec<f32>,

    /// Result window of each sub-query.
    pub k: u32,
}

/// The sub-queries of a hybrid retrieval. Both carry the same scope filter.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub vector: VectorQuery,
    pub keyword: KeywordQuery,
}

impl QueryPlan {
    pub fn filter(&self) -> &ScopeFilter {
        self.vector.filter()
    }
}

/// Turns logical requests into typed store queries.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    num_candidates: u32,
    keyword_fields: Vec<FieldWeight>,
    match_mode: MultiMatchMode,
}

impl QueryPlanner {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            num_candidates: config.num_candidates,
            keyword_fields: config.keyword_fields.to_field_weights(),
            match_mode: config.match_mode,
        }
    }

    /// Plan both sub-queries. A missing or blank scope is rejected before
    /// anything else is validated.
    pub fn plan(&self, request: LogicalRequest<'_>) -> Result<QueryPlan> {
        let filter = ScopeFilter::new(request.scope_key)?;

        let vector = self.vector_query(
            filter.clone(),
            request.vector_field,
            request.vector,
            request.k,
        )?;
        let keyword = self.keyword_query(filter, request.text, request.k)?;

        Ok(QueryPlan { vector, keyword })
    }

    /// Nearest-neighbor sub-query. The candidate pool never drops below `k`.
    pub fn vector_query(
        &self,
        filter: ScopeFilter,
        field: VectorField,
        vector: Vec<f32>,
        k: u32,
    ) -> Result<VectorQuery> {
        VectorQuery::new(field, vector, k, self.num_candidates.max(k), filter)
    }

    /// Multi-field keyword sub-query with the configured boosts.
    pub fn keyword_query(&self, filter: ScopeFilter, text: &str, k: u32) -> Result<KeywordQuery> {
        KeywordQuery::new(
            text,
            self.keyword_fields.clone(),
            self.match_mode,
            k,
            filter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::TextField;

    fn request(scope_key: Option<&str>) -> LogicalRequest<'_> {
        LogicalRequest {
            text: "Does it run well on the Steam Deck?",
            scope_key,
            vector_field: VectorField::QuestionAnswer,
            vector: vec![0.5, 0.5, 0.5, 0.5],
            k: 20,
        }
    }

    #[test]
    fn test_plan_shares_scope() {
        let planner = QueryPlanner::new(&SearchConfig::default());
        let plan = planner.plan(request(Some("Hades"))).unwrap();

        assert_eq!(plan.vector.filter(), plan.keyword.filter());
        assert_eq!(plan.filter().scope_key(), "Hades");
        assert_eq!(plan.vector.field(), VectorField::QuestionAnswer);
        assert_eq!(plan.vector.k(), 20);
        assert_eq!(plan.vector.num_candidates(), 10_000);
        assert_eq!(plan.keyword.k(), 20);
        assert_eq!(plan.keyword.mode(), MultiMatchMode::BestFields);
    }

    #[test]
    fn test_default_boosts_favor_question() {
        let planner = QueryPlanner::new(&SearchConfig::default());
        let plan = planner.plan(request(Some("Hades"))).unwrap();

        let question = plan
            .keyword
            .fields()
            .iter()
            .find(|fw| fw.field == TextField::Question)
            .unwrap();
        assert_eq!(question.weight, 3.0);
        assert_eq!(plan.keyword.fields().len(), 3);
    }

    #[test]
    fn test_missing_scope_rejected() {
        let planner = QueryPlanner::new(&SearchConfig::default());

        let err = planner.plan(request(None)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");

        let err = planner.plan(request(Some("  "))).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_candidate_pool_covers_k() {
        let config = SearchConfig {
            num_candidates: 10,
            ..SearchConfig::default()
        };
        let planner = QueryPlanner::new(&config);

        let plan = planner.plan(request(Some("Hades"))).unwrap();
        assert_eq!(plan.vector.num_candidates(), 20);
    }
}
