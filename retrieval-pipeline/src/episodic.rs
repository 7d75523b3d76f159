use common::{error::AppError, storage::types::memory::Memory};
use serde_json::json;
use tracing::instrument;

use crate::{RetrievalContext, SearchHit};

/// Time-ordered recall: case-insensitive substring match over memory bodies,
/// newest first. Every hit is a valid hit, so the score is flat.
#[instrument(skip_all, fields(user_id, top_k))]
pub async fn search_episodic(
    ctx: &RetrievalContext,
    query: &str,
    user_id: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, AppError> {
    if top_k == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let memories = Memory::search_content(user_id, query, top_k, &ctx.db).await?;

    Ok(memories
        .into_iter()
        .map(|memory| SearchHit {
            text: memory.content.clone(),
            score: 1.0,
            metadata: json!({
                "type": "memory",
                "memory_id": memory.id,
                "created_at": memory.created_at.to_rfc3339(),
                "title": memory.title,
            }),
            chunk: None,
        })
        .collect())
}
