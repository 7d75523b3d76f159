use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::{
    error::AppError,
    storage::{
        types::{chunk::Chunk, fact::Fact, user::User},
        vector::{RecordType, VectorFilter},
    },
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::{
    scoring::{fact_recency_bonus, triple_similarity},
    RetrievalContext, SearchHit,
};

/// State view: current-truth retrieval over the fact store.
///
/// Vector search proposes candidates, the relational store is the arbiter of
/// currency, scoring blends confidence with vector rank and recency, and a
/// passive cleanup pass retires fuzzy duplicates it encounters on the way.
#[instrument(skip_all, fields(user_id, top_k))]
pub async fn search_state(
    ctx: &RetrievalContext,
    query: &str,
    user_id: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, AppError> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let fetch_k = top_k.saturating_mul(ctx.tuning.state_fetch_multiplier);
    let query_embedding = ctx.embedder.embed(query).await?;

    let matches = ctx
        .vectors
        .query(
            query_embedding,
            fetch_k,
            &VectorFilter::with_type(user_id, RecordType::Fact),
            false,
        )
        .await?;

    // Rank order of the vector results, keyed by relational fact id.
    let ranked_ids: Vec<String> = matches
        .iter()
        .filter_map(|m| {
            m.record
                .fact_id
                .clone()
                .or_else(|| Fact::parse_vector_id(&m.id))
        })
        .collect();

    if ranked_ids.is_empty() {
        return Ok(Vec::new());
    }

    // Only the relational store knows what is still current.
    let facts = Fact::current_by_ids(user_id, ranked_ids.clone(), &ctx.db).await?;
    if facts.is_empty() {
        return Ok(Vec::new());
    }

    let rank_of: HashMap<&str, usize> = ranked_ids
        .iter()
        .enumerate()
        .map(|(rank, id)| (id.as_str(), rank))
        .collect();

    let now = Utc::now();
    let mut ranked: Vec<(Fact, f32)> = facts
        .into_iter()
        .map(|fact| {
            let mut score = fact.confidence;
            if let Some(&rank) = rank_of.get(fact.id.as_str()) {
                score += 2.0 - (rank as f32) * 0.1;
            }
            score += fact_recency_bonus(fact.valid_from, now, &ctx.tuning);
            (fact, score)
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.valid_from.cmp(&a.0.valid_from))
            .then_with(|| b.0.id.cmp(&a.0.id))
    });

    let timezone = user_timezone(ctx, user_id).await;

    // Walk the ranked list, skipping fuzzy duplicates: same valid_from and a
    // near-identical normalized triple. The kept item is the better-scored
    // one since the walk is in rank order.
    let mut seen: Vec<(String, DateTime<Utc>)> = Vec::new();
    let mut redundant_ids: Vec<String> = Vec::new();
    let mut results: Vec<SearchHit> = Vec::new();

    for (fact, score) in ranked.into_iter().take(top_k * 2) {
        let normalized = fact.normalized_triple();

        let is_duplicate = seen.iter().any(|(seen_norm, seen_from)| {
            *seen_from == fact.valid_from
                && triple_similarity(&normalized, seen_norm)
                    > ctx.tuning.cleanup_similarity_threshold
        });
        if is_duplicate {
            redundant_ids.push(fact.id.clone());
            continue;
        }

        seen.push((normalized, fact.valid_from));

        if results.len() >= top_k {
            break;
        }

        let local_date = fact.valid_from.with_timezone(&timezone).format("%Y-%m-%d");
        let text = format!("[{local_date}] {}", fact.triple_text());

        let chunk = source_chunk(ctx, &fact).await;

        results.push(SearchHit {
            text,
            score,
            metadata: json!({
                "type": "fact",
                "fact_id": fact.id,
                "confidence": fact.confidence,
                "valid_from": fact.valid_from.to_rfc3339(),
                "location": fact.location,
                "semantic_match": true,
            }),
            chunk,
        });
    }

    // Passive cleanup happens after the result set is assembled; the caller
    // does not wait on it.
    if !redundant_ids.is_empty() {
        info!(
            count = redundant_ids.len(),
            "retrieval cleanup: marking redundant facts as superseded"
        );
        let db = std::sync::Arc::clone(&ctx.db);
        tokio::spawn(async move {
            if let Err(err) = Fact::mark_superseded(redundant_ids, &db).await {
                warn!(error = %err, "retrieval cleanup failed");
            }
        });
    }

    debug!(results = results.len(), "state search complete");
    Ok(results)
}

async fn user_timezone(ctx: &RetrievalContext, user_id: &str) -> Tz {
    match ctx.db.get_item::<User>(user_id).await {
        Ok(Some(user)) => user.tz(),
        _ => Tz::UTC,
    }
}

/// The chunk a fact was extracted from, for callers that want the context.
async fn source_chunk(ctx: &RetrievalContext, fact: &Fact) -> Option<Chunk> {
    let chunk_id = fact.source_chunk_id.as_deref()?;
    ctx.db.get_item::<Chunk>(chunk_id).await.ok().flatten()
}
