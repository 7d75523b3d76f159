use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    chunk::Chunk,
    fact::Fact,
    memory::Memory,
    task::Task,
    user::User,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, guardrails};

#[derive(Debug, Deserialize)]
pub struct CreateMemoryRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Honored only when the submission is tagged `memorybench`.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MemoryResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub status: String,
    pub show_in_inbox: bool,
    pub source: Option<String>,
    pub created_at: String,
}

impl From<&Memory> for MemoryResponse {
    fn from(memory: &Memory) -> Self {
        Self {
            id: memory.id.clone(),
            title: memory.title.clone(),
            content: memory.content.clone(),
            tags: memory.tags.clone(),
            status: memory.status.as_str().to_string(),
            show_in_inbox: memory.show_in_inbox,
            source: memory.source_llm.clone(),
            created_at: memory.created_at.to_rfc3339(),
        }
    }
}

/// Submit a memory. Approved submissions are scheduled for ingestion right
/// away; everything gets a metadata and a dedupe task.
pub async fn create_memory(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateMemoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    guardrails::validate_input(&request.content)?;
    if request.content.trim().is_empty() {
        return Err(ApiError::ValidationError("Content cannot be empty".into()));
    }

    let memory = Memory::from_submission(
        &user,
        request.title,
        request.content,
        request.tags,
        request.created_at,
    );

    let stored = state
        .db
        .store_item(memory)
        .await
        .map_err(common::error::AppError::from)?
        .ok_or_else(|| ApiError::InternalError("Memory failed to store".into()))?;

    Task::enqueue_for_submission(
        &user.id,
        &stored.id,
        stored.status.is_ingestable(),
        &state.db,
    )
    .await?;

    info!(memory_id = %stored.id, status = stored.status.as_str(), "memory submitted");

    Ok((StatusCode::CREATED, Json(MemoryResponse::from(&stored))))
}

/// Delete a memory and everything derived from it. Vector deletions run
/// first so no vector is left pointing at a missing row.
pub async fn delete_memory(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let memory = Memory::get_owned(&id, &user.id, &state.db).await?;

    let facts = Fact::get_by_memory_id(&memory.id, &state.db).await?;
    let fact_vector_ids: Vec<String> = facts.iter().map(Fact::vector_id).collect();

    state.vectors.delete_ids(fact_vector_ids).await?;
    state.vectors.delete_by_memory_id(&memory.id).await?;
    Chunk::delete_by_memory_id(&memory.id, &state.db).await?;
    Fact::delete_by_memory_id(&memory.id, &state.db).await?;
    state
        .db
        .delete_item::<Memory>(&memory.id)
        .await
        .map_err(common::error::AppError::from)?;

    info!(memory_id = %memory.id, "memory deleted with cascade");

    Ok((StatusCode::OK, Json(json!({ "status": "deleted", "id": id }))))
}
