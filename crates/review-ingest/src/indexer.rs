//! Embeds ground-truth entries and writes them to the store.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use review_core::{Embedder, IngestConfig, Record, RecordVectors, Result, ReviewError, Store};

use crate::loader::{load_ground_truth, GroundTruthEntry};

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Entries read from the input.
    pub entries: usize,

    /// Records written to the store.
    pub inserted: usize,

    /// Entries whose content was already indexed.
    pub duplicates: usize,

    /// Entries without a usable game title.
    pub skipped: usize,
}

/// Corpus indexer.
pub struct Indexer<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    batch_size: usize,
}

impl<S, E> Indexer<S, E>
where
    S: Store,
    E: Embedder,
{
    /// Create an indexer. The embedder must produce vectors of the store's
    /// dimension.
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: &IngestConfig) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(ReviewError::DimensionMismatch {
                field: "embedder".to_string(),
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }
        if config.batch_size == 0 {
            return Err(ReviewError::config("ingest.batch_size must be at least 1"));
        }

        Ok(Self {
            store,
            embedder,
            batch_size: config.batch_size,
        })
    }

    /// Load and index a ground-truth JSON file.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<IndexReport> {
        let path = path.as_ref();
        info!("Loading ground truth from {:?}", path);
        let entries = load_ground_truth(path).await?;
        self.index_entries(&entries).await
    }

    /// Index entries in batches. Re-running on the same input inserts
    /// nothing new.
    pub async fn index_entries(&self, entries: &[GroundTruthEntry]) -> Result<IndexReport> {
        let mut report = IndexReport {
            entries: entries.len(),
            ..Default::default()
        };

        let mut scoped = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.scope_key() {
                Some(scope_key) => scoped.push((scope_key, entry)),
                None => {
                    warn!(
                        "Skipping entry {} (appid {}): review has no title",
                        entry.document_id.as_deref().unwrap_or("?"),
                        entry.appid
                    );
                    report.skipped += 1;
                }
            }
        }

        for batch in scoped.chunks(self.batch_size) {
            let records = self.build_records(batch).await?;
            let inserted = self.store.insert_records(&records).await?;

            report.inserted += inserted;
            report.duplicates += records.len() - inserted;
            debug!("Indexed batch: {} records, {} new", records.len(), inserted);
        }

        info!(
            "Indexing complete: {} entries, {} inserted, {} duplicates, {} skipped",
            report.entries, report.inserted, report.duplicates, report.skipped
        );

        Ok(report)
    }

    async fn build_records(&self, batch: &[(&str, &GroundTruthEntry)]) -> Result<Vec<Record>> {
        // Three texts per entry: question, answer, "question answer".
        let mut texts = Vec::with_capacity(batch.len() * 3);
        for (_, entry) in batch {
            texts.push(entry.question.trim().to_string());
            texts.push(entry.answer.trim().to_string());
            texts.push(
                format!("{} {}", entry.question.trim(), entry.answer.trim())
                    .trim()
                    .to_string(),
            );
        }

        let vectors = self.embed_texts(&texts).await?;
        let mut vectors = vectors.into_iter();

        let mut records = Vec::with_capacity(batch.len());
        for (scope_key, entry) in batch {
            let (question, answer, question_answer) = match (vectors.next(), vectors.next(), vectors.next()) {
                (Some(q), Some(a), Some(qa)) => (q, a, qa),
                _ => return Err(ReviewError::embedding("Embedder returned too few vectors")),
            };

            records.push(Record::new(
                scope_key,
                &entry.question,
                &entry.answer,
                &entry.section,
                RecordVectors {
                    question,
                    answer,
                    question_answer,
                },
                entry.provenance(),
            ));
        }

        Ok(records)
    }

    /// Embed non-empty texts in one call; empty texts get a zero vector.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dimension = self.store.dimension();
        let non_empty: Vec<&str> = texts
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.as_str())
            .collect();

        let embedded = if non_empty.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&non_empty).await?
        };
        if embedded.len() != non_empty.len() {
            return Err(ReviewError::embedding(format!(
                "Expected {} embeddings, got {}",
                non_empty.len(),
                embedded.len()
            )));
        }

        let mut embedded = embedded.into_iter();
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            if text.is_empty() {
                vectors.push(vec![0.0; dimension]);
            } else {
                vectors.push(embedded.next().unwrap_or_else(|| vec![0.0; dimension]));
            }
        }

        Ok(vectors)
    }
}
