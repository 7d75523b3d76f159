use chrono::{DateTime, Utc};

use crate::RetrievalTuning;

/// Word-level Jaccard overlap between two texts. Used as the hard textual
/// dedupe gate during MMR selection.
pub fn jaccard_overlap(a: &str, b: &str) -> f32 {
    let a_words: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let b_words: std::collections::HashSet<&str> = b.split_whitespace().collect();

    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let intersection = a_words.intersection(&b_words).count() as f32;
    let union = a_words.union(&b_words).count() as f32;
    intersection / union
}

/// Chunk recency: +10% for today, decaying to nothing after a month.
pub fn recency_multiplier(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days = (now - created_at).num_days().max(0);
    1.0 + 0.1 / (days.max(1) as f32)
}

/// The composite re-ranking function for semantic hits.
pub fn composite_chunk_score(
    base_similarity: f32,
    feedback_score: f32,
    trust_score: f32,
    recency: f32,
) -> f32 {
    base_similarity * (1.0 + feedback_score) * (0.5 + trust_score) * recency
}

/// Step-wise bonus for recent facts in the state view.
pub fn fact_recency_bonus(
    valid_from: DateTime<Utc>,
    now: DateTime<Utc>,
    tuning: &RetrievalTuning,
) -> f32 {
    let days = (now - valid_from).num_days().max(0);
    if days < 30 {
        tuning.recency_bonus_30d
    } else if days < 90 {
        tuning.recency_bonus_90d
    } else if days < 365 {
        tuning.recency_bonus_365d
    } else {
        0.0
    }
}

/// Character-level similarity ratio for the passive cleanup of near-identical
/// triples.
pub fn triple_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}
