use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::Chunk, vector::{VectorRecord, VectorStore}},
};
use common::llm::ChunkEnrichment;
use tracing::{info, instrument, warn};

use crate::{pipeline::build_embedding_text, services::PipelineServices};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reindexed: usize,
    pub orphans_deleted: usize,
}

/// The cross-store sweep: the relational and vector stores cannot share a
/// transaction, so this periodically (a) re-embeds chunks whose vector went
/// missing and (b) deletes chunk vectors whose row went missing.
#[instrument(skip_all)]
pub async fn reconcile_vectors(
    db: &SurrealDbClient,
    vectors: &VectorStore,
    services: &dyn PipelineServices,
) -> Result<ReconcileReport, AppError> {
    let mut report = ReconcileReport::default();

    // (a) Chunk rows claiming a vector that does not exist → reindex.
    let chunks = Chunk::with_embedding_ids(db).await?;
    for chunk in &chunks {
        let Some(embedding_id) = chunk.embedding_id.as_deref() else {
            continue;
        };
        if vectors.get(embedding_id).await?.is_some() {
            continue;
        }

        let enrichment = ChunkEnrichment {
            summary: chunk.summary.clone(),
            generated_qas: chunk.generated_qas.clone(),
            entities: chunk.entities.clone(),
        };
        let enriched = build_embedding_text(&chunk.text, &enrichment);
        match services.embed(&enriched).await {
            Ok(embedding) => {
                vectors
                    .upsert(vec![VectorRecord::for_chunk(
                        embedding_id.to_string(),
                        embedding,
                        chunk.user_id.clone(),
                        chunk.memory_id.clone(),
                        chunk.chunk_index,
                        enriched,
                        Vec::new(),
                        None,
                    )])
                    .await?;
                report.reindexed += 1;
            }
            Err(err) => {
                warn!(chunk_id = %chunk.id, error = %err, "reindex embedding failed; will retry next sweep");
            }
        }
    }

    // (b) Chunk vectors with no matching row → orphans, delete.
    let live_ids: HashSet<String> = chunks
        .iter()
        .filter_map(|c| c.embedding_id.clone())
        .collect();
    let records = vectors.chunk_records().await?;
    let mut orphan_ids = Vec::new();
    for record in records {
        if !live_ids.contains(&record.id) {
            orphan_ids.push(record.id);
        }
    }
    report.orphans_deleted = orphan_ids.len();
    vectors.delete_ids(orphan_ids).await?;

    if report.reindexed > 0 || report.orphans_deleted > 0 {
        info!(
            reindexed = report.reindexed,
            orphans_deleted = report.orphans_deleted,
            "vector reconcile sweep applied fixes"
        );
    }

    Ok(report)
}
