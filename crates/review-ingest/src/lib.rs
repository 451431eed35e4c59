//! review-ingest - Corpus bootstrap
//!
//! Loads generated question/answer entries from a ground-truth JSON file,
//! embeds each pair three ways (question, answer, question + answer) and
//! writes the resulting records into a [`review_core::Store`].

mod indexer;
mod loader;

pub use indexer::{IndexReport, Indexer};
pub use loader::{load_ground_truth, parse_ground_truth, GroundTruthEntry, SourceAuthor, SourceReview};
