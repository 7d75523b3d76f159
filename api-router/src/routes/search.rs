use axum::{extract::State, response::IntoResponse, Extension, Json};
use common::storage::types::{chunk::Chunk, user::User};
use retrieval_pipeline::{search, SearchHit, SearchView};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub view: SearchView,
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub memory_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub summary: String,
    pub trust_score: f32,
    pub feedback_score: f32,
}

impl From<&Chunk> for ChunkResponse {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id.clone(),
            memory_id: chunk.memory_id.clone(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            summary: chunk.summary.clone(),
            trust_score: chunk.trust_score,
            feedback_score: chunk.feedback_score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
    pub chunk: Option<ChunkResponse>,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            text: hit.text,
            score: hit.score,
            metadata: hit.metadata,
            chunk: hit.chunk.as_ref().map(ChunkResponse::from),
        }
    }
}

/// Resolve a query against the corpus through the requested view.
pub async fn search_memories(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(
        top_k = request.top_k,
        view = ?request.view,
        "incoming search request"
    );

    let hits = search(
        &state.retrieval,
        &request.query,
        &user.id,
        request.top_k,
        request.view,
    )
    .await?;

    let results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();
    Ok(Json(results))
}
