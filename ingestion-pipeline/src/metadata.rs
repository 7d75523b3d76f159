use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::memory::Memory},
};
use tracing::{debug, instrument};

use crate::services::PipelineServices;

/// Auto-tagging task: asks the gateway for topic tags and merges them into
/// the memory's tag list. Existing tags always survive.
#[instrument(skip_all, fields(memory_id, user_id))]
pub async fn tag_memory(
    db: &SurrealDbClient,
    services: &dyn PipelineServices,
    user_id: &str,
    memory_id: &str,
) -> Result<(), AppError> {
    let memory: Memory = db
        .get_item(memory_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Memory {memory_id} not found")))?;

    let suggested = services
        .suggest_tags(user_id, &memory.content, &memory.tags)
        .await?;

    let merged = merge_tags(&memory.tags, &suggested);
    if merged == memory.tags {
        debug!(memory_id, "no new tags suggested");
        return Ok(());
    }

    debug!(memory_id, tags = ?merged, "updating memory tags");
    Memory::set_tags(memory_id, merged, db).await
}

/// Existing tags first, suggestions appended, case-insensitive dedupe.
fn merge_tags(existing: &[String], suggested: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + suggested.len());

    for tag in existing.iter().chain(suggested.iter()) {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !merged.iter().any(|t| t.eq_ignore_ascii_case(trimmed)) {
            merged.push(trimmed.to_string());
        }
    }

    merged
}
