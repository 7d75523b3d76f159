use std::collections::BTreeSet;

use common::{
    error::AppError,
    notifier::{Notifier, NotifierEvent},
    storage::{
        db::SurrealDbClient,
        types::{cluster::MemoryCluster, memory::Memory},
        vector::{RecordType, VectorFilter, VectorStore},
    },
};
use tracing::{debug, info, instrument};

use crate::services::PipelineServices;

/// How many nearest chunks to inspect for each new memory.
const NEIGHBOR_COUNT: usize = 5;
/// Cosine distance below which two texts count as near-duplicates.
const DUPLICATE_DISTANCE_THRESHOLD: f32 = 0.3;

/// Post-ingestion duplicate check: embeds the new memory's content, finds
/// its nearest chunks, and proposes a cluster when other memories sit within
/// the distance threshold. Resolution is left to the user.
#[instrument(skip_all, fields(memory_id))]
pub async fn check_duplicates(
    db: &SurrealDbClient,
    vectors: &VectorStore,
    services: &dyn PipelineServices,
    notifier: &Notifier,
    memory_id: &str,
) -> Result<Option<MemoryCluster>, AppError> {
    let memory: Memory = db
        .get_item(memory_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Memory {memory_id} not found")))?;

    let embedding = services.embed(&memory.content).await?;
    let matches = vectors
        .query(
            embedding,
            NEIGHBOR_COUNT,
            &VectorFilter::with_type(&memory.user_id, RecordType::MemoryChunk),
            false,
        )
        .await?;

    // The store scores by similarity; the threshold is a distance.
    let mut candidate_ids: BTreeSet<String> = BTreeSet::new();
    for m in matches {
        let distance = 1.0 - m.score;
        if distance >= DUPLICATE_DISTANCE_THRESHOLD {
            continue;
        }
        if let Some(other_memory_id) = m.record.memory_id {
            if other_memory_id != memory_id {
                candidate_ids.insert(other_memory_id);
            }
        }
    }

    if candidate_ids.is_empty() {
        debug!(memory_id, "no near-duplicates found");
        return Ok(None);
    }

    let mut member_ids: Vec<String> = vec![memory_id.to_string()];
    member_ids.extend(candidate_ids);
    let member_count = member_ids.len();

    let cluster = MemoryCluster::new(
        memory.user_id.clone(),
        member_ids,
        format!("Cluster centered on: {}", memory.title),
    );
    let stored = db
        .store_item(cluster)
        .await?
        .ok_or_else(|| AppError::InternalError("Cluster failed to store".into()))?;

    info!(
        memory_id,
        cluster_id = %stored.id,
        member_count,
        "near-duplicate cluster proposed"
    );

    notifier
        .publish(
            &memory.user_id,
            NotifierEvent::NewCluster {
                cluster_id: stored.id.clone(),
                member_count,
            },
        )
        .await;

    Ok(Some(stored))
}
