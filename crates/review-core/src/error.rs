//! Error types for review retrieval.

use thiserror::Error;

/// Result type alias using ReviewError.
pub type Result<T> = std::result::Result<T, ReviewError>;

/// The step of a retrieval call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Embedding,
    VectorSearch,
    KeywordSearch,
    Fetch,
}

impl std::fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Embedding => "embedding",
            Self::VectorSearch => "vector search",
            Self::KeywordSearch => "keyword search",
            Self::Fetch => "record fetch",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur in review retrieval.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// Malformed or incomplete request. Never retried.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// A store or embedder call failed or timed out during retrieval.
    #[error("Retrieval unavailable: {stage} failed for scope '{scope_key}' (field: {field}): {reason}")]
    RetrievalUnavailable {
        stage: RetrievalStage,
        scope_key: String,
        field: String,
        reason: String,
    },

    /// Record not found.
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    /// Vector length does not match the store dimension.
    #[error("Dimension mismatch for {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReviewError {
    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a retrieval-unavailable error with full context.
    pub fn unavailable(
        stage: RetrievalStage,
        scope_key: impl Into<String>,
        field: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::RetrievalUnavailable {
            stage,
            scope_key: scope_key.into(),
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetrievalUnavailable { .. })
    }

    /// Stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
