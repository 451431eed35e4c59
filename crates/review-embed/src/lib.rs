//! review-embed - ONNX sentence embedding wrapper
//!
//! This crate provides text embeddings from sentence-transformers models
//! exported to ONNX (multi-qa-MiniLM-L6-cos-v1 by default, 384 dimensions).
//!
//! # Features
//!
//! - ONNX Runtime integration for fast inference
//! - Inference on the blocking pool, bounded by available cores
//! - Mean pooling with attention mask
//! - L2 normalization
//! - Deterministic mock embedder for tests

mod mock;
mod onnx;

pub use mock::MockEmbedder;
pub use onnx::OnnxEmbedder;

// Re-export the Embedder trait for convenience
pub use review_core::Embedder;
