use axum::{extract::State, response::IntoResponse, Extension, Json};
use common::storage::types::user::User;
use retrieval_pipeline::{search, SearchView};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError, guardrails};

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub context: Vec<String>,
}

/// Grounded chat: retrieve semantic context for the query, then answer using
/// only that context. The budget gate closes the door before any retrieval
/// or model call happens.
pub async fn chat(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    guardrails::validate_input(&request.query)?;

    state.usage.check_budget(&user.id).await?;

    let hits = search(
        &state.retrieval,
        &request.query,
        &user.id,
        request.top_k,
        SearchView::Semantic,
    )
    .await?;
    let context: Vec<String> = hits.into_iter().map(|hit| hit.text).collect();

    let response = state.gateway.answer(&user.id, &request.query, &context).await?;

    Ok(Json(ChatResponse { response, context }))
}
