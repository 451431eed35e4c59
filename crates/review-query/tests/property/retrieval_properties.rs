use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use review_core::{Embedder, Record, RecordVectors, ReviewProvenance, SearchConfig, Store};
use review_embed::MockEmbedder;
use review_query::{reciprocal_rank_fusion, QueryEngine};
use review_store::SqliteStore;
use ulid::Ulid;

const DIM: usize = 16;
const SCOPES: &[&str] = &["Hades", "Celeste", "Stardew Valley", "Unindexed Game"];
const WORDS: &[&str] = &[
    "combat", "music", "bugs", "performance", "story", "price", "controls", "multiplayer",
];

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Index `(scope, question word, answer word)` triples into a fresh store.
async fn build_engine(entries: &[(usize, &str, &str)]) -> QueryEngine<SqliteStore, MockEmbedder> {
    let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
    let embedder = Arc::new(MockEmbedder::with_config(DIM, 64));

    let mut records = Vec::new();
    for (scope, q, a) in entries {
        let question = format!("What about the {}?", q);
        let answer = format!("The {} is fine", a);
        let both = format!("{} {}", question, answer);
        let vectors = embedder
            .embed_batch(&[question.as_str(), answer.as_str(), both.as_str()])
            .await
            .unwrap();
        let mut vectors = vectors.into_iter();
        records.push(Record::new(
            SCOPES[*scope],
            &question,
            &answer,
            q,
            RecordVectors {
                question: vectors.next().unwrap(),
                answer: vectors.next().unwrap(),
                question_answer: vectors.next().unwrap(),
            },
            ReviewProvenance::default(),
        ));
    }
    store.insert_records(&records).await.unwrap();

    QueryEngine::new(store, embedder, SearchConfig::default())
}

fn corpus() -> impl Strategy<Value = Vec<(usize, &'static str, &'static str)>> {
    prop::collection::vec(
        (0usize..3, prop::sample::select(WORDS), prop::sample::select(WORDS)),
        0..30,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retrieval_never_leaves_scope(
        entries in corpus(),
        scope in 0usize..4,
        word in prop::sample::select(WORDS),
        num_results in 1u32..40,
    ) {
        let rt = runtime();
        let records = rt.block_on(async {
            let engine = build_engine(&entries).await;
            engine
                .retrieve(&format!("how is the {}", word), SCOPES[scope], num_results)
                .await
                .unwrap()
        });

        prop_assert!(records.len() <= num_results as usize);
        for record in &records {
            prop_assert_eq!(record.scope_key.as_str(), SCOPES[scope]);
        }
        if scope == 3 {
            prop_assert!(records.is_empty());
        }
    }

    #[test]
    fn retrieval_is_repeatable(
        entries in corpus(),
        scope in 0usize..3,
        word in prop::sample::select(WORDS),
    ) {
        let rt = runtime();
        let (first, second) = rt.block_on(async {
            let engine = build_engine(&entries).await;
            let question = format!("{} problems?", word);
            let first = engine.retrieve(&question, SCOPES[scope], 10).await.unwrap();
            let second = engine.retrieve(&question, SCOPES[scope], 10).await.unwrap();
            (first, second)
        });

        let ids = |rs: &[Record]| rs.iter().map(|r| r.id).collect::<Vec<_>>();
        prop_assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn fusion_is_a_total_order_without_duplicates(
        vector in prop::collection::vec(0u128..50, 0..40),
        keyword in prop::collection::vec(0u128..50, 0..40),
        k in 1u32..100,
    ) {
        let vector: Vec<Ulid> = vector.into_iter().map(Ulid::from).collect();
        let keyword: Vec<Ulid> = keyword.into_iter().map(Ulid::from).collect();

        let fused = reciprocal_rank_fusion(&vector, &keyword, k);

        let union: HashSet<Ulid> = vector.iter().chain(&keyword).copied().collect();
        prop_assert_eq!(fused.len(), union.len());

        for pair in fused.windows(2) {
            let ordered = pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].id < pair[1].id);
            prop_assert!(ordered);
        }

        // Same inputs, same output
        prop_assert_eq!(fused, reciprocal_rank_fusion(&vector, &keyword, k));
    }
}
