//! Ground-truth file format.

use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use review_core::{Result, ReviewAuthor, ReviewProvenance};

/// One generated question/answer pair and the review it came from.
#[derive(Debug, Clone, Deserialize)]
pub struct GroundTruthEntry {
    /// Sequential id assigned by the generator. Informational only.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub document_id: Option<String>,

    #[serde(deserialize_with = "string_or_number")]
    pub appid: String,

    #[serde(default)]
    pub review: Option<SourceReview>,

    pub question: String,

    pub answer: String,

    #[serde(default)]
    pub section: String,
}

/// The Steam review an entry was generated from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceReview {
    /// Game title; becomes the record's scope key.
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, alias = "recommendation_id", deserialize_with = "opt_string_or_number")]
    pub recommendationid: Option<String>,

    #[serde(default)]
    pub language: Option<String>,

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
    pub author: Option<SourceAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceAuthor {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub steamid: Option<String>,

    #[serde(default, alias = "playtimeforever")]
    pub playtime_forever: Option<i64>,

    #[serde(default)]
    pub playtime_last_two_weeks: Option<i64>,

    #[serde(default)]
    pub playtime_at_review: Option<i64>,

    #[serde(default)]
    pub last_played: Option<i64>,
}

impl GroundTruthEntry {
    /// Scope key for the entry, if its review carries a non-blank title.
    pub fn scope_key(&self) -> Option<&str> {
        self.review
            .as_ref()
            .and_then(|r| r.title.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Review metadata carried on the record.
    pub fn provenance(&self) -> ReviewProvenance {
        let review = self.review.clone().unwrap_or_default();
        ReviewProvenance {
            appid: self.appid.clone(),
            recommendation_id: review.recommendationid,
            language: review.language,
            review: review.review,
            voted_up: review.voted_up,
            votes_up: review.votes_up,
            timestamp_created: review.timestamp_created,
            timestamp_updated: review.timestamp_updated,
            timestamp_query: review.timestamp_query,
            author: review.author.map(|a| ReviewAuthor {
                steamid: a.steamid,
                playtime_forever: a.playtime_forever,
                playtime_last_two_weeks: a.playtime_last_two_weeks,
                playtime_at_review: a.playtime_at_review,
                last_played: a.last_played,
            }),
        }
    }
}

/// Read a ground-truth JSON array from disk.
pub async fn load_ground_truth(path: impl AsRef<Path>) -> Result<Vec<GroundTruthEntry>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_ground_truth(&content)
}

/// Parse a ground-truth JSON array.
pub fn parse_ground_truth(content: &str) -> Result<Vec<GroundTruthEntry>> {
    Ok(serde_json::from_str(content)?)
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
