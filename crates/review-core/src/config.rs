//! Configuration types for review retrieval.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ReviewError};
use crate::query::{FieldWeight, MultiMatchMode};
use crate::types::{TextField, VectorField, DEFAULT_DIMENSION};

/// Environment variable overriding `database.path`.
pub const ENV_DB_PATH: &str = "REVIEWS_DB_PATH";

/// Environment variable overriding `embedding.model_path`.
pub const ENV_MODEL_PATH: &str = "REVIEWS_MODEL_PATH";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Corpus indexing configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Vector dimension fixed at store creation.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            dimension: DEFAULT_DIMENSION,
            wal_mode: true,
            cache_size: -64000, // 64MB
            busy_timeout_ms: 30000,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model directory (model.onnx + tokenizer.json).
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Output dimension of the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum tokens per input.
    #[serde(default = "default_embed_max_tokens")]
    pub max_tokens: usize,

    /// Number of intra-op threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Feed a zeroed `token_type_ids` input (BERT-style exports need it).
    #[serde(default = "default_true")]
    pub use_token_type_ids: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dimension: DEFAULT_DIMENSION,
            max_tokens: 512,
            num_threads: 4,
            use_token_type_ids: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn model_file(&self) -> PathBuf {
        self.model_path.join("model.onnx")
    }

    pub fn tokenizer_file(&self) -> PathBuf {
        self.model_path.join("tokenizer.json")
    }
}

/// Keyword field boosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordFieldsConfig {
    #[serde(default = "default_question_weight")]
    pub question: f32,
    #[serde(default = "default_field_weight")]
    pub answer: f32,
    #[serde(default = "default_field_weight")]
    pub section: f32,
}

impl Default for KeywordFieldsConfig {
    fn default() -> Self {
        Self {
            question: 3.0,
            answer: 1.0,
            section: 1.0,
        }
    }
}

impl KeywordFieldsConfig {
    /// Field weights in query order.
    pub fn to_field_weights(&self) -> Vec<FieldWeight> {
        vec![
            FieldWeight::new(TextField::Question, self.question),
            FieldWeight::new(TextField::Answer, self.answer),
            FieldWeight::new(TextField::Section, self.section),
        ]
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_num_results")]
    pub default_num_results: u32,

    /// Maximum number of results a caller may request.
    #[serde(default = "default_max_num_results")]
    pub max_num_results: u32,

    /// Lower bound on the per-sub-query result window.
    #[serde(default = "default_min_fetch_k")]
    pub min_fetch_k: u32,

    /// Candidate pool for the nearest-neighbor search.
    #[serde(default = "default_num_candidates")]
    pub num_candidates: u32,

    /// RRF constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Vector field searched when the caller does not pick one.
    #[serde(default = "default_vector_field")]
    pub vector_field: VectorField,

    /// Keyword field boosts.
    #[serde(default)]
    pub keyword_fields: KeywordFieldsConfig,

    /// Per-field score combination.
    #[serde(default)]
    pub match_mode: MultiMatchMode,

    /// Timeout applied to each sub-query.
    #[serde(default = "default_sub_query_timeout")]
    pub sub_query_timeout_ms: u64,

    /// Timeout applied to query embedding.
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_num_results: 5,
            max_num_results: 100,
            min_fetch_k: 20,
            num_candidates: 10_000,
            rrf_k: 60,
            vector_field: VectorField::QuestionAnswer,
            keyword_fields: KeywordFieldsConfig::default(),
            match_mode: MultiMatchMode::BestFields,
            sub_query_timeout_ms: 5000,
            embed_timeout_ms: 10_000,
        }
    }
}

impl SearchConfig {
    /// Reject settings that would make every query fail.
    pub fn validate(&self) -> Result<()> {
        if self.max_num_results == 0 {
            return Err(ReviewError::config("search.max_num_results must be at least 1"));
        }
        if self.default_num_results == 0 || self.default_num_results > self.max_num_results {
            return Err(ReviewError::config(format!(
                "search.default_num_results must be in [1, {}]",
                self.max_num_results
            )));
        }
        if self.rrf_k == 0 {
            return Err(ReviewError::config("search.rrf_k must be at least 1"));
        }
        if self.sub_query_timeout_ms == 0 || self.embed_timeout_ms == 0 {
            return Err(ReviewError::config("search timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Corpus indexing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Records embedded and inserted per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { batch_size: 32 }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_embed_max_tokens() -> usize {
    512
}

fn default_num_threads() -> usize {
    4
}

fn default_question_weight() -> f32 {
    3.0
}

fn default_field_weight() -> f32 {
    1.0
}

fn default_num_results() -> u32 {
    5
}

fn default_max_num_results() -> u32 {
    100
}

fn default_min_fetch_k() -> u32 {
    20
}

fn default_num_candidates() -> u32 {
    10_000
}

fn default_rrf_k() -> u32 {
    60
}

fn default_vector_field() -> VectorField {
    VectorField::QuestionAnswer
}

fn default_sub_query_timeout() -> u64 {
    5000
}

fn default_embed_timeout() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    32
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reviews-rag")
        .join("reviews.db")
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reviews-rag")
        .join("models")
        .join("multi-qa-MiniLM-L6-cos-v1")
}

impl ReviewConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ReviewError::config(format!("Failed to parse config: {}", e)))?;
        config.search.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("reviews-rag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("reviews-rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Apply `REVIEWS_DB_PATH` / `REVIEWS_MODEL_PATH` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_MODEL_PATH).filter(|p| !p.is_empty()) {
            self.embedding.model_path = PathBuf::from(path);
        }
    }
}
