//! Reciprocal Rank Fusion (RRF) for combining the two sub-query rankings.

use std::collections::HashMap;
use ulid::Ulid;

/// One fused result: its RRF score and where it ranked in each list.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub id: Ulid,

    /// Sum of `1 / (k + rank)` over the lists containing `id`.
    pub score: f64,

    /// 1-based rank in the vector list.
    pub vector_rank: Option<u32>,

    /// 1-based rank in the keyword list.
    pub keyword_rank: Option<u32>,
}

/// Contribution of a single 1-based rank.
pub fn rrf_contribution(k: u32, rank: u32) -> f64 {
    1.0 / (k as f64 + rank as f64)
}

/// Fuse the vector and keyword rankings with Reciprocal Rank Fusion.
///
/// RRF score = Σ (1 / (k + rank_i)) over the lists an id appears in
///
/// If a list repeats an id only its first occurrence counts. The output
/// holds every distinct id, ordered by score descending, ties broken by id
/// ascending, so the same inputs always give the same order.
pub fn reciprocal_rank_fusion(vector_ids: &[Ulid], keyword_ids: &[Ulid], k: u32) -> Vec<RankingEntry> {
    let mut entries: HashMap<Ulid, RankingEntry> =
        HashMap::with_capacity(vector_ids.len() + keyword_ids.len());

    for (i, id) in vector_ids.iter().enumerate() {
        let rank = i as u32 + 1;
        let entry = entries.entry(*id).or_insert_with(|| empty_entry(*id));
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.score += rrf_contribution(k, rank);
        }
    }

    for (i, id) in keyword_ids.iter().enumerate() {
        let rank = i as u32 + 1;
        let entry = entries.entry(*id).or_insert_with(|| empty_entry(*id));
        if entry.keyword_rank.is_none() {
            entry.keyword_rank = Some(rank);
            entry.score += rrf_contribution(k, rank);
        }
    }

    let mut fused: Vec<RankingEntry> = entries.into_values().collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    fused
}

fn empty_entry(id: Ulid) -> RankingEntry {
    RankingEntry {
        id,
        score: 0.0,
        vector_rank: None,
        keyword_rank: None,
    }
}
