//! Core domain types for review retrieval.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Result, ReviewError};

/// Output dimension of multi-qa-MiniLM-L6-cos-v1.
pub const DEFAULT_DIMENSION: usize = 384;

/// One of the three dense vectors stored per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorField {
    Question,
    Answer,
    QuestionAnswer,
}

impl VectorField {
    pub const ALL: [VectorField; 3] = [Self::Question, Self::Answer, Self::QuestionAnswer];

    /// Column name in the persisted schema.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Question => "question_vector",
            Self::Answer => "answer_vector",
            Self::QuestionAnswer => "question_answer_vector",
        }
    }
}

impl std::fmt::Display for VectorField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl std::str::FromStr for VectorField {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "question" | "question_vector" => Ok(Self::Question),
            "answer" | "answer_vector" => Ok(Self::Answer),
            "question_answer" | "question_answer_vector" => Ok(Self::QuestionAnswer),
            other => Err(ReviewError::invalid_request(format!(
                "unknown vector field: {}",
                other
            ))),
        }
    }
}

/// A free-text field searched by the keyword sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Question,
    Answer,
    Section,
}

impl TextField {
    pub const ALL: [TextField; 3] = [Self::Question, Self::Answer, Self::Section];

    pub fn column(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Section => "section",
        }
    }
}

impl std::fmt::Display for TextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// The three embeddings of a record. Always fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordVectors {
    pub question: Vec<f32>,
    pub answer: Vec<f32>,
    pub question_answer: Vec<f32>,
}

impl RecordVectors {
    /// All-zero vectors, the defined value for missing text.
    pub fn zeros(dimension: usize) -> Self {
        Self {
            question: vec![0.0; dimension],
            answer: vec![0.0; dimension],
            question_answer: vec![0.0; dimension],
        }
    }

    pub fn get(&self, field: VectorField) -> &[f32] {
        match field {
            VectorField::Question => &self.question,
            VectorField::Answer => &self.answer,
            VectorField::QuestionAnswer => &self.question_answer,
        }
    }

    /// Check that every vector has exactly `dimension` components.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        for field in VectorField::ALL {
            let actual = self.get(field).len();
            if actual != dimension {
                return Err(ReviewError::DimensionMismatch {
                    field: field.column().to_string(),
                    expected: dimension,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Playtime details of the review author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewAuthor {
    #[serde(default)]
    pub steamid: Option<String>,
    #[serde(default)]
    pub playtime_forever: Option<i64>,
    #[serde(default)]
    pub playtime_last_two_weeks: Option<i64>,
    #[serde(default)]
    pub playtime_at_review: Option<i64>,
    #[serde(default)]
    pub last_played: Option<i64>,
}

/// Fields copied from the source Steam review. Carried, not interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewProvenance {
    /// Steam application id.
    pub appid: String,
    #[serde(default)]
    pub recommendation_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Original review text the Q&A pair was generated from.
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub voted_up: Option<bool>,
    #[serde(default)]
    pub votes_up: Option<i64>,
    #[serde(default)]
    pub timestamp_created: Option<i64>,
    #[serde(default)]
    pub timestamp_updated: Option<i64>,
    #[serde(default)]
    pub timestamp_query: Option<i64>,
    #[serde(default)]
    pub author: Option<ReviewAuthor>,
}

/// A question/answer record, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Game title. Every query is confined to one scope.
    pub scope_key: String,

    pub question: String,
    pub answer: String,

    /// Categorical tag such as "audio" or "bugs".
    pub section: String,

    pub vectors: RecordVectors,

    pub provenance: ReviewProvenance,

    /// Blake3 hash of scope, question, answer and section.
    #[serde(with = "serde_bytes_opt")]
    pub content_hash: Option<[u8; 32]>,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

impl Record {
    /// Create a new record with a fresh id.
    pub fn new(
        scope_key: &str,
        question: &str,
        answer: &str,
        section: &str,
        vectors: RecordVectors,
        provenance: ReviewProvenance,
    ) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            id: Ulid::new(),
            scope_key: scope_key.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            section: section.to_string(),
            vectors,
            provenance,
            content_hash: Some(Self::hash_content(scope_key, question, answer, section)),
            created_at: now,
        }
    }

    /// Hash used to detect re-ingestion of the same Q&A pair.
    pub fn hash_content(scope_key: &str, question: &str, answer: &str, section: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for part in [scope_key, question, answer, section] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        *hasher.finalize().as_bytes()
    }
}

/// A record returned by one sub-query, in store order.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Ulid,

    /// Similarity or relevance score from the store (higher is better).
    pub score: f32,

    pub record: Record,
}

/// Which signal(s) produced a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Hybrid,
    VectorOnly,
    KeywordOnly,
}

/// A ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRecord {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Fused RRF score in hybrid mode, the store score otherwise.
    pub score: f64,

    /// Rank in the vector sub-query, if present there.
    pub vector_rank: Option<u32>,

    /// Rank in the keyword sub-query, if present there.
    pub keyword_rank: Option<u32>,

    pub record: Record,
}

/// Retrieval results container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// The original question.
    pub query: String,

    pub scope_key: String,

    pub mode: SearchMode,

    /// Total results returned.
    pub total_results: usize,

    /// Retrieval latency in milliseconds.
    pub latency_ms: u64,

    pub results: Vec<RetrievedRecord>,
}

impl SearchResults {
    /// Drop ranking metadata, keeping the ordered records.
    pub fn into_records(self) -> Vec<Record> {
        self.results.into_iter().map(|r| r.record).collect()
    }
}

/// Statistics about the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Number of records.
    pub records: u64,

    /// Number of distinct scopes.
    pub scopes: u64,

    /// Vector dimension of the store.
    pub dimension: usize,

    /// Database size in bytes.
    pub storage_bytes: u64,

    /// Optional scope filter applied.
    pub filter: Option<String>,
}

/// Helper module for optional byte array serialization.
mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => {
                let hex = hex::encode(bytes);
                hex.serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(hex) => {
                let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid hash length"))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }
}
