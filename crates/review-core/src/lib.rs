//! review-core - Core types and traits for review retrieval
//!
//! This crate provides the record model, the typed sub-query model, the
//! store/embedder traits and error handling shared by the rest of the
//! workspace.

pub mod config;
pub mod error;
pub mod query;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RetrievalStage, ReviewError, Result};
pub use query::*;
pub use traits::*;
pub use types::*;
