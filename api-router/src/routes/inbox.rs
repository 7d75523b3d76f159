use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use common::{
    notifier::NotifierEvent,
    storage::types::{
        chunk::Chunk,
        memory::{Memory, MemoryStatus},
        task::{Task, TaskKind},
        user::User,
    },
    utils::html::strip_html,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

/// Hard cap on agent-drop bodies: anything at or past 50 KiB is refused.
const DROP_MAX_BODY_BYTES: usize = 50 * 1024;

#[derive(Debug, Serialize)]
pub struct InboxItem {
    pub id: String,
    pub content: String,
    pub source: String,
    pub created_at: String,
    pub status: String,
    pub details: Option<String>,
    pub tags: Vec<String>,
}

impl From<&Memory> for InboxItem {
    fn from(memory: &Memory) -> Self {
        Self {
            id: memory.id.clone(),
            content: memory.content.clone(),
            source: memory
                .source_llm
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            created_at: memory.created_at.to_rfc3339(),
            status: memory.status.as_str().to_string(),
            details: Some(memory.title.clone()),
            tags: memory.tags.clone(),
        }
    }
}

pub async fn get_inbox(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let items = Memory::inbox_items(&user.id, &state.db).await?;
    let response: Vec<InboxItem> = items.iter().map(InboxItem::from).collect();
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct InboxAction {
    pub action: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Approve, discard, edit, or dismiss a pending memory.
pub async fn inbox_action(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(action): Json<InboxAction>,
) -> Result<impl IntoResponse, ApiError> {
    let memory = Memory::get_owned(&id, &user.id, &state.db).await?;

    let status = match action.action.as_str() {
        "approve" => {
            Memory::set_status(&memory.id, MemoryStatus::Approved, &state.db).await?;
            Memory::set_show_in_inbox(&memory.id, false, &state.db).await?;
            Task::enqueue(TaskKind::Ingestion, &user.id, &memory.id, &state.db).await?;

            publish_update(&state, &user.id, &memory.id, "approve").await;
            "approved".to_string()
        }
        "discard" => {
            Memory::set_status(&memory.id, MemoryStatus::Discarded, &state.db).await?;
            Memory::set_show_in_inbox(&memory.id, false, &state.db).await?;

            // A discarded memory keeps its row but loses its vectors and
            // chunks; vectors go first.
            state.vectors.delete_by_memory_id(&memory.id).await?;
            Chunk::delete_by_memory_id(&memory.id, &state.db).await?;
            Memory::set_embedding_id(&memory.id, None, &state.db).await?;

            publish_update(&state, &user.id, &memory.id, "discard").await;
            "discarded".to_string()
        }
        "edit" => {
            let content = action
                .payload
                .as_ref()
                .and_then(|p| p.get("content"))
                .and_then(|c| c.as_str())
                .ok_or_else(|| {
                    ApiError::ValidationError("Missing content for edit".to_string())
                })?;

            Memory::set_content(&memory.id, content, &state.db).await?;
            Memory::set_status(&memory.id, MemoryStatus::Approved, &state.db).await?;
            Memory::set_show_in_inbox(&memory.id, false, &state.db).await?;
            Task::enqueue(TaskKind::Ingestion, &user.id, &memory.id, &state.db).await?;

            publish_update(&state, &user.id, &memory.id, "edit").await;
            "approved_edited".to_string()
        }
        "dismiss" => {
            // Hidden from the inbox, status untouched.
            Memory::set_show_in_inbox(&memory.id, false, &state.db).await?;

            publish_update(&state, &user.id, &memory.id, "dismiss").await;
            memory.status.as_str().to_string()
        }
        other => {
            return Err(ApiError::ValidationError(format!(
                "Invalid action: {other}"
            )));
        }
    };

    Ok(Json(json!({ "status": status, "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct AgentDropPayload {
    pub title: Option<String>,
    pub content: String,
    pub job_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Token-addressed drop box for external agents. The result is always a
/// pending, untrusted inbox item.
pub async fn agent_drop(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let user = User::find_by_drop_token(&token, &state.db)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or missing drop token".to_string()))?;

    if body.len() >= DROP_MAX_BODY_BYTES {
        return Err(ApiError::PayloadTooLarge(
            "Payload too large (max 50KB)".to_string(),
        ));
    }

    let client_ip = client_ip(&headers);
    if !state.drop_limiter.allow(&client_ip) {
        return Err(ApiError::TooManyRequests(
            "Too many requests. Try again later.".to_string(),
        ));
    }

    let payload: AgentDropPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::ValidationError(format!("Invalid payload: {e}")))?;

    let clean_content = strip_html(&payload.content);
    if clean_content.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "Content cannot be empty after stripping HTML".to_string(),
        ));
    }

    let memory = Memory::from_agent_drop(
        user.id.clone(),
        payload.title,
        clean_content,
        payload.job_id,
    );
    let stored = state
        .db
        .store_item(memory)
        .await
        .map_err(common::error::AppError::from)?
        .ok_or_else(|| ApiError::InternalError("Drop failed to store".into()))?;

    info!(memory_id = %stored.id, client_ip, "agent drop accepted");

    publish_update(&state, &user.id, &stored.id, "new_drop").await;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "id": stored.id,
            "message": "Item added to inbox for review"
        })),
    ))
}

async fn publish_update(state: &ApiState, user_id: &str, memory_id: &str, action: &str) {
    state
        .notifier
        .publish(
            user_id,
            NotifierEvent::InboxUpdate {
                memory_id: memory_id.to_string(),
                action: action.to_string(),
            },
        )
        .await;
}

/// The client IP for rate limiting: leftmost `X-Forwarded-For` hop, then
/// `X-Real-IP`. Unattributed clients share one bucket.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .map_or_else(|| "unknown".to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());
        headers.insert("x-real-ip", "192.168.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.1.2.3");

        let mut real_only = HeaderMap::new();
        real_only.insert("x-real-ip", "192.168.0.9".parse().unwrap());
        assert_eq!(client_ip(&real_only), "192.168.0.9");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
