//! Typed sub-query model consumed by the store.
//!
//! Both request types are validated when constructed, so a store
//! implementation can rely on a non-blank scope, sane sizes and finite
//! vectors/weights.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewError};
use crate::types::{TextField, VectorField};

/// Exact-match restriction to a single scope (game title).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeFilter(String);

impl ScopeFilter {
    /// Build a filter from an optional scope key. Absent or blank keys
    /// are rejected so a query never spans the whole corpus.
    pub fn new(scope_key: Option<&str>) -> Result<Self> {
        match scope_key {
            Some(key) if !key.trim().is_empty() => Ok(Self(key.to_string())),
            Some(_) => Err(ReviewError::invalid_request("scope_key must not be blank")),
            None => Err(ReviewError::invalid_request("scope_key is required")),
        }
    }

    pub fn scope_key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nearest-neighbor search over one vector field.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    field: VectorField,
    vector: Vec<f32>,
    k: u32,
    num_candidates: u32,
    filter: ScopeFilter,
}

impl VectorQuery {
    pub fn new(
        field: VectorField,
        vector: Vec<f32>,
        k: u32,
        num_candidates: u32,
        filter: ScopeFilter,
    ) -> Result<Self> {
        if vector.is_empty() {
            return Err(ReviewError::invalid_request("query vector is empty"));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ReviewError::invalid_request(
                "query vector contains non-finite values",
            ));
        }
        if k == 0 {
            return Err(ReviewError::invalid_request("k must be at least 1"));
        }
        if num_candidates < k {
            return Err(ReviewError::invalid_request(format!(
                "num_candidates ({}) must be >= k ({})",
                num_candidates, k
            )));
        }

        Ok(Self {
            field,
            vector,
            k,
            num_candidates,
            filter,
        })
    }

    pub fn field(&self) -> VectorField {
        self.field
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn num_candidates(&self) -> u32 {
        self.num_candidates
    }

    pub fn filter(&self) -> &ScopeFilter {
        &self.filter
    }
}

/// A text field and its boost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeight {
    pub field: TextField,
    pub weight: f32,
}

impl FieldWeight {
    pub fn new(field: TextField, weight: f32) -> Self {
        Self { field, weight }
    }
}

/// How per-field scores combine into a record score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiMatchMode {
    /// A record is scored by its single best weighted field.
    #[default]
    BestFields,
    /// Weighted per-field scores are summed.
    MostFields,
}

/// Multi-field free-text relevance search.
#[derive(Debug, Clone)]
pub struct KeywordQuery {
    text: String,
    fields: Vec<FieldWeight>,
    mode: MultiMatchMode,
    k: u32,
    filter: ScopeFilter,
}

impl KeywordQuery {
    pub fn new(
        text: &str,
        fields: Vec<FieldWeight>,
        mode: MultiMatchMode,
        k: u32,
        filter: ScopeFilter,
    ) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(ReviewError::invalid_request("keyword query text is empty"));
        }
        if fields.is_empty() {
            return Err(ReviewError::invalid_request(
                "keyword query needs at least one field",
            ));
        }
        for fw in &fields {
            if !fw.weight.is_finite() || fw.weight <= 0.0 {
                return Err(ReviewError::invalid_request(format!(
                    "weight for field '{}' must be positive, got {}",
                    fw.field, fw.weight
                )));
            }
        }
        let mut seen = Vec::with_capacity(fields.len());
        for fw in &fields {
            if seen.contains(&fw.field) {
                return Err(ReviewError::invalid_request(format!(
                    "field '{}' listed twice",
                    fw.field
                )));
            }
            seen.push(fw.field);
        }
        if k == 0 {
            return Err(ReviewError::invalid_request("k must be at least 1"));
        }

        Ok(Self {
            text: text.to_string(),
            fields,
            mode,
            k,
            filter,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fields(&self) -> &[FieldWeight] {
        &self.fields
    }

    pub fn mode(&self) -> MultiMatchMode {
        self.mode
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn filter(&self) -> &ScopeFilter {
        &self.filter
    }

    /// Field list in `name^weight` form, for logs and error context.
    pub fn describe_fields(&self) -> String {
        self.fields
            .iter()
            .map(|fw| format!("{}^{}", fw.field, fw.weight))
            .collect::<Vec<_>>()
            .join(",")
    }
}
