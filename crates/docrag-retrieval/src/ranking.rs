//! Post-search ranking: visibility, score floor, span dedup and truncation.

use docrag_core::config::RetrievalSettings;
use docrag_core::types::{sort_ranked, RankedChunk};

#[derive(Debug, Clone)]
pub struct RankingPolicy {
    pub dedup: bool,
    pub dedup_score_delta: f32,
    pub min_score: Option<f32>,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self::from(&RetrievalSettings::default())
    }
}

impl From<&RetrievalSettings> for RankingPolicy {
    fn from(s: &RetrievalSettings) -> Self {
        Self { dedup: s.dedup, dedup_score_delta: s.dedup_score_delta, min_score: s.min_score }
    }
}

/// Over-fetch size handed to the index for a final `k`.
pub fn candidate_count(k: usize, over_fetch: usize) -> usize {
    k.max(k.saturating_mul(over_fetch))
}

/// Drops a result when a higher-ranked kept result of the same document
/// overlaps its span and scores within `delta` of it. Input must be ranked.
pub fn dedup_overlapping(ranked: Vec<RankedChunk>, delta: f32) -> Vec<RankedChunk> {
    let mut kept: Vec<RankedChunk> = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        let redundant = kept.iter().any(|k| k.spans_overlap(&candidate) && k.score - candidate.score <= delta);
        if !redundant {
            kept.push(candidate);
        }
    }
    kept
}

/// Applies the policy and returns at most `k` results in ranking order.
/// `visible` decides whether a document may be returned at all.
pub fn finalize(
    mut candidates: Vec<RankedChunk>,
    k: usize,
    policy: &RankingPolicy,
    visible: impl Fn(&str) -> bool,
) -> Vec<RankedChunk> {
    candidates.retain(|c| visible(&c.document_id) && policy.min_score.map_or(true, |min| c.score >= min));
    sort_ranked(&mut candidates);
    let mut ranked = if policy.dedup { dedup_overlapping(candidates, policy.dedup_score_delta) } else { candidates };
    ranked.truncate(k);
    ranked
}
