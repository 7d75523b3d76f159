use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    llm::{ChunkEnrichment, FactCandidate},
    notifier::{Notifier, NotifierEvent},
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            memory::Memory,
            task::{Task, TaskKind},
        },
        vector::{VectorRecord, VectorStore},
    },
};
use futures::future::{join_all, try_join_all};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{dedupe, metadata, services::PipelineServices};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    /// Width of the fan-out semaphore bounding concurrent LLM and embedding
    /// calls per task.
    pub llm_concurrency: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            llm_concurrency: 10,
        }
    }
}

pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    vectors: VectorStore,
    services: Arc<dyn PipelineServices>,
    facts: Arc<crate::facts::FactService>,
    notifier: Arc<Notifier>,
    tuning: IngestionTuning,
    /// Process-global bound on concurrent provider calls; every task's
    /// fan-out draws from the same pool.
    semaphore: Arc<Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vectors: VectorStore,
        services: Arc<dyn PipelineServices>,
        facts: Arc<crate::facts::FactService>,
        notifier: Arc<Notifier>,
        tuning: IngestionTuning,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(tuning.llm_concurrency.max(1)));
        Self {
            db,
            vectors,
            services,
            facts,
            notifier,
            tuning,
            semaphore,
        }
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn services(&self) -> &dyn PipelineServices {
        self.services.as_ref()
    }

    /// Runs one claimed task to completion, retrying transient failures with
    /// capped exponential backoff and dead-lettering the rest.
    #[instrument(
        skip_all,
        fields(task_id = %task.id, kind = ?task.kind, attempt = task.attempts, user_id = %task.user_id)
    )]
    pub async fn process_task(&self, task: Task) -> Result<(), AppError> {
        let processing = task.mark_processing(&self.db).await?;

        match self.drive(&processing).await {
            Ok(()) => {
                processing.mark_succeeded(&self.db).await?;
                info!(
                    task_id = %processing.id,
                    attempt = processing.attempts,
                    "task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();

                if err.is_retryable() && processing.can_retry() {
                    let delay = self.retry_delay(processing.attempts);
                    processing
                        .mark_failed(reason.clone(), delay, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing.id,
                        attempt = processing.attempts,
                        retry_in_secs = delay.as_secs(),
                        error = %reason,
                        "task failed; scheduled retry"
                    );
                } else {
                    processing.mark_dead_letter(reason.clone(), &self.db).await?;
                    warn!(
                        task_id = %processing.id,
                        attempt = processing.attempts,
                        error = %reason,
                        "task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    async fn drive(&self, task: &Task) -> Result<(), AppError> {
        match task.kind {
            TaskKind::Ingestion => self.run_ingestion(&task.memory_id, &task.user_id).await,
            TaskKind::Metadata => {
                metadata::tag_memory(&self.db, self.services.as_ref(), &task.user_id, &task.memory_id)
                    .await
            }
            TaskKind::Dedupe => dedupe::check_duplicates(
                &self.db,
                &self.vectors,
                self.services.as_ref(),
                &self.notifier,
                &task.memory_id,
            )
            .await
            .map(|_| ()),
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    /// The ingestion path: chunk, enrich, persist chunks, index vectors,
    /// extract and admit facts, finalize. Keyed by memory id and idempotent:
    /// a redelivery regenerates the memory's chunks and vectors from scratch.
    #[instrument(skip_all, fields(memory_id, user_id))]
    pub async fn run_ingestion(&self, memory_id: &str, user_id: &str) -> Result<(), AppError> {
        let memory: Memory = self
            .db
            .get_item(memory_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Memory {memory_id} not found")))?;

        if !memory.status.is_ingestable() {
            info!(memory_id, status = memory.status.as_str(), "memory not approved; skipping ingestion");
            return Ok(());
        }

        // Relative temporal phrases resolve against the memory's creation
        // time, not the wall clock.
        let reference_date = memory.created_at;

        // Regenerate: vectors go first so no vector outlives its chunk row.
        self.vectors.delete_by_memory_id(memory_id).await?;
        Chunk::delete_by_memory_id(memory_id, &self.db).await?;

        let chunk_texts = self.services.chunk_text(&memory.content).await?;
        if chunk_texts.is_empty() {
            warn!(memory_id, "no chunks produced; nothing to ingest");
            return Ok(());
        }
        debug!(memory_id, chunk_count = chunk_texts.len(), "chunking complete");

        let semaphore = Arc::clone(&self.semaphore);

        // Enrichment fan-out. A single failure aborts the whole batch so no
        // chunk is ever written without its summary; the task runner retries.
        let enrichments: Vec<ChunkEnrichment> =
            try_join_all(chunk_texts.iter().map(|text| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AppError::InternalError(format!("semaphore closed: {e}")))?;
                    self.services.enrich_chunk(user_id, text).await
                }
            }))
            .await?;

        // Fact extraction fan-out. Failures are recorded per chunk and the
        // chunk itself stays valid.
        let fact_results: Vec<Result<Vec<FactCandidate>, AppError>> =
            join_all(chunk_texts.iter().map(|text| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AppError::InternalError(format!("semaphore closed: {e}")))?;
                    self.services
                        .extract_facts(user_id, text, Some(reference_date))
                        .await
                }
            }))
            .await;

        // Chunk rows flush and commit before anything references them.
        let chunks: Vec<Chunk> = chunk_texts
            .iter()
            .zip(enrichments.iter())
            .enumerate()
            .map(|(i, (text, enrichment))| {
                Chunk::new(
                    memory_id.to_string(),
                    user_id.to_string(),
                    i as i64,
                    text.clone(),
                    Uuid::new_v4().to_string(),
                    enrichment.summary.clone(),
                    enrichment.generated_qas.clone(),
                    enrichment.entities.clone(),
                )
            })
            .collect();
        Chunk::store_batch(&chunks, &self.db).await?;

        // One vector per chunk, embedding the enriched text.
        let records: Vec<VectorRecord> = try_join_all(
            chunks
                .iter()
                .zip(enrichments.iter())
                .map(|(chunk, enrichment)| {
                    let semaphore = Arc::clone(&semaphore);
                    let memory = &memory;
                    async move {
                        let _permit = semaphore.acquire_owned().await.map_err(|e| {
                            AppError::InternalError(format!("semaphore closed: {e}"))
                        })?;
                        let enriched = build_embedding_text(&chunk.text, enrichment);
                        let embedding = self.services.embed(&enriched).await?;
                        let embedding_id = chunk
                            .embedding_id
                            .clone()
                            .ok_or_else(|| {
                                AppError::InternalError("chunk missing embedding id".into())
                            })?;
                        Ok::<_, AppError>(VectorRecord::for_chunk(
                            embedding_id,
                            embedding,
                            memory.user_id.clone(),
                            memory.id.clone(),
                            chunk.chunk_index,
                            enriched,
                            memory.tags.clone(),
                            memory.source_llm.clone(),
                        ))
                    }
                }),
        )
        .await?;
        self.vectors.upsert(records).await?;

        // Facts: each chunk's batch runs in its own short transaction under
        // the same semaphore, so one chunk's retry cannot invalidate others.
        let fact_outcomes = join_all(
            chunks
                .iter()
                .zip(fact_results.into_iter())
                .filter_map(|(chunk, result)| match result {
                    Ok(candidates) if !candidates.is_empty() => Some((chunk, candidates)),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(
                            memory_id,
                            chunk_id = %chunk.id,
                            error = %err,
                            "fact extraction failed for chunk; skipping"
                        );
                        None
                    }
                })
                .map(|(chunk, candidates)| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire_owned().await.map_err(|e| {
                            AppError::InternalError(format!("semaphore closed: {e}"))
                        })?;
                        self.facts
                            .create_facts(candidates, user_id, memory_id, &chunk.id)
                            .await
                    }
                }),
        )
        .await;

        let mut facts_created = 0usize;
        for outcome in fact_outcomes {
            match outcome {
                Ok(inserted) => facts_created += inserted.len(),
                Err(err) => warn!(memory_id, error = %err, "fact persistence failed for chunk"),
            }
        }

        // Finalize: legacy pointer to the first chunk's vector.
        let first_embedding_id = chunks.first().and_then(|c| c.embedding_id.clone());
        Memory::set_embedding_id(memory_id, first_embedding_id, &self.db).await?;

        self.notifier
            .publish(
                user_id,
                NotifierEvent::IngestionComplete {
                    memory_id: memory_id.to_string(),
                },
            )
            .await;

        info!(
            memory_id,
            chunk_count = chunks.len(),
            facts_created,
            "ingestion complete"
        );

        Ok(())
    }
}

/// The text that actually gets embedded: the chunk body plus its enrichment
/// context, so retrieval matches questions the chunk can answer.
pub fn build_embedding_text(text: &str, enrichment: &ChunkEnrichment) -> String {
    if enrichment.summary.is_empty() && enrichment.generated_qas.is_empty() {
        return text.to_string();
    }

    let mut enriched = format!("{text}\n\n-- Context --\nSummary: {}\n", enrichment.summary);
    if !enrichment.generated_qas.is_empty() {
        enriched.push_str("Q&A:\n");
        for qa in &enrichment.generated_qas {
            enriched.push_str(&format!("Q: {}\nA: {}\n", qa.question, qa.answer));
        }
    }
    enriched
}
