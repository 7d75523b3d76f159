use std::collections::HashMap;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        types::{chunk::Chunk, memory::Memory},
        vector::{VectorFilter, VectorMatch},
    },
    utils::embedding::cosine_similarity,
};
use serde_json::json;
use tracing::{debug, instrument};

use crate::{
    scoring::{composite_chunk_score, jaccard_overlap, recency_multiplier},
    RetrievalContext, SearchHit,
};

/// Semantic view: over-fetch, MMR-diversify, hydrate from the relational
/// store, then re-rank with feedback, trust, and recency.
#[instrument(skip_all, fields(user_id, top_k))]
pub async fn search_semantic(
    ctx: &RetrievalContext,
    query: &str,
    user_id: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, AppError> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let fetch_k = top_k.saturating_mul(ctx.tuning.semantic_fetch_multiplier);
    let query_embedding = ctx.embedder.embed(query).await?;

    let candidates = ctx
        .vectors
        .query(
            query_embedding,
            fetch_k,
            &VectorFilter::for_user(user_id),
            true,
        )
        .await?;

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let selected = mmr_select(
        &candidates,
        top_k,
        ctx.tuning.mmr_lambda,
        ctx.tuning.jaccard_dedupe_threshold,
    );
    debug!(
        candidates = candidates.len(),
        selected = selected.len(),
        "mmr selection done"
    );

    // Hydrate selected ids with their chunk rows and parent memories, the
    // source of canonical text and timestamps.
    let selected_ids: Vec<String> = selected
        .iter()
        .map(|&i| candidates[i].id.clone())
        .collect();
    let chunks = Chunk::get_by_embedding_ids(selected_ids, &ctx.db).await?;
    let chunk_map: HashMap<String, Chunk> = chunks
        .into_iter()
        .filter_map(|c| c.embedding_id.clone().map(|id| (id, c)))
        .collect();

    let memory_ids: Vec<String> = chunk_map
        .values()
        .map(|c| c.memory_id.clone())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    let memory_map: HashMap<String, Memory> = Memory::by_ids(memory_ids, &ctx.db)
        .await?
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    let now = Utc::now();
    let mut hits = Vec::with_capacity(selected.len());

    for &idx in &selected {
        let candidate = &candidates[idx];
        let base_score = candidate.score;

        if let Some(chunk) = chunk_map.get(&candidate.id) {
            let created_at = memory_map
                .get(&chunk.memory_id)
                .map_or(chunk.created_at, |m| m.created_at);
            let recency = recency_multiplier(created_at, now);
            let score = composite_chunk_score(
                base_score,
                chunk.feedback_score,
                chunk.trust_score,
                recency,
            );

            hits.push(SearchHit {
                text: chunk.text.clone(),
                score,
                metadata: json!({
                    "type": "memory_chunk",
                    "memory_id": chunk.memory_id,
                    "chunk_id": chunk.id,
                    "chunk_index": chunk.chunk_index,
                    "summary": chunk.summary,
                    "trust_score": chunk.trust_score,
                    "recency_boost": (recency * 100.0).round() / 100.0,
                }),
                chunk: Some(chunk.clone()),
            });
        } else {
            // The row is gone or this hit is a fact vector: fall back to the
            // store's copy of the text at the raw similarity score.
            hits.push(SearchHit {
                text: candidate.record.text_content.clone(),
                score: base_score,
                metadata: json!({
                    "type": candidate.record.record_type.as_str(),
                    "memory_id": candidate.record.memory_id,
                    "fact_id": candidate.record.fact_id,
                }),
                chunk: None,
            });
        }
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Ok(hits)
}

/// Greedy MMR: each round picks the candidate maximizing
/// `λ·relevance − (1−λ)·redundancy`, where redundancy is the highest cosine
/// similarity to anything already selected. Candidates whose text overlaps an
/// accepted text beyond the Jaccard threshold are never admitted.
fn mmr_select(
    candidates: &[VectorMatch],
    top_k: usize,
    lambda: f32,
    jaccard_threshold: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::with_capacity(top_k);
    let mut accepted_texts: Vec<String> = Vec::with_capacity(top_k);

    while selected.len() < top_k.min(candidates.len()) {
        let mut best_idx: Option<usize> = None;
        let mut best_score = f32::NEG_INFINITY;

        for (i, candidate) in candidates.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }

            let text = candidate.record.text_content.trim();
            let is_duplicate = accepted_texts.iter().any(|seen| {
                // Quick length gate before the set comparison.
                if seen.len().abs_diff(text.len()) > text.len() / 5 {
                    return false;
                }
                jaccard_overlap(&text.to_lowercase(), &seen.to_lowercase()) > jaccard_threshold
            });
            if is_duplicate {
                continue;
            }

            let relevance = candidate.score;
            let redundancy = selected
                .iter()
                .map(|&j| {
                    cosine_similarity(
                        &candidate.record.embedding,
                        &candidates[j].record.embedding,
                    )
                })
                .fold(0.0f32, f32::max);

            let mmr_score = lambda * relevance - (1.0 - lambda) * redundancy;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(i) => {
                accepted_texts.push(candidates[i].record.text_content.trim().to_string());
                selected.push(i);
            }
            None => break,
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::vector::{RecordType, VectorRecord};

    fn candidate(id: &str, text: &str, embedding: Vec<f32>, score: f32) -> VectorMatch {
        let now = Utc::now();
        VectorMatch {
            id: id.to_string(),
            score,
            record: VectorRecord {
                id: id.to_string(),
                created_at: now,
                updated_at: now,
                user_id: "u".into(),
                record_type: RecordType::MemoryChunk,
                embedding,
                text_content: text.to_string(),
                memory_id: Some("m".into()),
                chunk_index: Some(0),
                fact_id: None,
                valid_from: None,
                tags: vec![],
                source: None,
            },
        }
    }

    #[test]
    fn test_mmr_skips_near_identical_texts() {
        let candidates = vec![
            candidate(
                "a",
                "the quick brown fox jumps over the lazy dog",
                vec![1.0, 0.0],
                0.95,
            ),
            candidate(
                "b",
                "the quick brown fox jumps over the lazy dog today",
                vec![0.99, 0.01],
                0.94,
            ),
            candidate("c", "completely different topic entirely", vec![0.0, 1.0], 0.5),
        ];

        let selected = mmr_select(&candidates, 3, 0.3, 0.85);
        // The second candidate is a textual duplicate of the first and can
        // never be admitted; the third, diverse one gets in.
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&0));
        assert!(selected.contains(&2));
    }

    #[test]
    fn test_mmr_prefers_diversity_over_marginal_relevance() {
        let candidates = vec![
            candidate("a", "alpha text one", vec![1.0, 0.0], 0.95),
            candidate("b", "alpha text one variant close by", vec![0.999, 0.001], 0.94),
            candidate("c", "orthogonal subject matter", vec![0.0, 1.0], 0.60),
        ];

        let selected = mmr_select(&candidates, 2, 0.3, 1.1);
        assert_eq!(selected[0], 0, "highest relevance goes first");
        assert_eq!(
            selected[1], 2,
            "low-similarity candidate beats the redundant one"
        );
    }

    #[test]
    fn test_mmr_respects_top_k() {
        let candidates = vec![
            candidate("a", "one", vec![1.0, 0.0], 0.9),
            candidate("b", "two", vec![0.0, 1.0], 0.8),
        ];
        assert_eq!(mmr_select(&candidates, 1, 0.3, 0.85).len(), 1);
        assert_eq!(mmr_select(&candidates, 5, 0.3, 0.85).len(), 2);
        assert!(mmr_select(&[], 3, 0.3, 0.85).is_empty());
    }
}
