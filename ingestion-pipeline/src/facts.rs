use std::sync::Arc;

use common::{
    error::AppError,
    llm::{
        judge::{FactJudge, FactJudgment, JudgeCandidate, JudgeDecision},
        FactCandidate,
    },
    storage::{
        db::SurrealDbClient,
        types::fact::{is_single_value_predicate, Fact},
        types::StoredObject,
        vector::{RecordType, VectorFilter, VectorRecord, VectorStore},
    },
    utils::embedding::EmbeddingProvider,
};
use futures::future::join_all;
use tracing::{debug, instrument, warn};

/// How many nearest existing facts the judge gets to see.
const JUDGE_CANDIDATES: usize = 3;

struct AnalyzedCandidate {
    candidate: FactCandidate,
    judgment: FactJudgment,
    embedding: Vec<f32>,
}

struct PlannedInsert {
    fact: Fact,
    embedding: Vec<f32>,
    /// Single-value predicates get the deterministic supersession guard.
    needs_guard: bool,
}

/// Admits extracted fact candidates into the fact store.
///
/// Phase 1 analyzes every candidate in parallel against its nearest existing
/// facts (reads and LLM only); phase 2 applies the decisions sequentially in
/// a single transaction, then indexes the new facts in the vector store.
pub struct FactService {
    db: Arc<SurrealDbClient>,
    vectors: VectorStore,
    embedder: Arc<EmbeddingProvider>,
    judge: Arc<dyn FactJudge>,
}

impl FactService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vectors: VectorStore,
        embedder: Arc<EmbeddingProvider>,
        judge: Arc<dyn FactJudge>,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            judge,
        }
    }

    #[instrument(skip_all, fields(user_id, memory_id, chunk_id, candidates = candidates.len()))]
    pub async fn create_facts(
        &self,
        candidates: Vec<FactCandidate>,
        user_id: &str,
        memory_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<Fact>, AppError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Phase 1: parallel, read-only analysis.
        let analyses = join_all(
            candidates
                .into_iter()
                .map(|candidate| self.analyze(user_id, candidate)),
        )
        .await;

        // Phase 2: sequential application under one transaction.
        let mut to_insert: Vec<PlannedInsert> = Vec::new();
        let mut supersede_targets: Vec<String> = Vec::new();

        for analysis in analyses {
            let AnalyzedCandidate {
                candidate,
                judgment,
                embedding,
            } = analysis?;

            match judgment.decision {
                JudgeDecision::Duplicate => {
                    debug!(fact = %candidate.triple_text(), "dropping duplicate fact");
                    continue;
                }
                JudgeDecision::Supersede => {
                    if let Some(target) = judgment.target_id {
                        supersede_targets.push(target);
                    }
                }
                JudgeDecision::New => {}
            }

            let fact = Fact::new(
                user_id.to_string(),
                candidate.subject,
                candidate.predicate,
                candidate.object,
                candidate.confidence,
                Some(memory_id.to_string()),
                Some(chunk_id.to_string()),
                candidate.valid_from,
                candidate.location,
            );

            // Write-phase idempotency: an identical row from a previous
            // delivery of the same task means this insert already happened.
            if Fact::exists_duplicate(
                user_id,
                &fact.subject,
                &fact.predicate,
                &fact.object,
                fact.valid_from,
                Some(chunk_id),
                &self.db,
            )
            .await?
            {
                debug!(fact = %fact.triple_text(), "fact already persisted; skipping");
                continue;
            }

            to_insert.push(PlannedInsert {
                needs_guard: is_single_value_predicate(&fact.predicate),
                fact,
                embedding,
            });
        }

        if to_insert.is_empty() && supersede_targets.is_empty() {
            return Ok(Vec::new());
        }

        self.apply_decisions(user_id, &supersede_targets, &to_insert)
            .await?;

        // Index the new facts; the reconciler covers a crash between the
        // commit above and these upserts.
        let mut inserted = Vec::with_capacity(to_insert.len());
        for planned in to_insert {
            self.vectors
                .upsert(vec![VectorRecord::for_fact(&planned.fact, planned.embedding)])
                .await?;
            inserted.push(planned.fact);
        }

        Ok(inserted)
    }

    /// Decides NEW / DUPLICATE / SUPERSEDE for one candidate. Never writes.
    /// Judge failures degrade to NEW so extraction stays best-effort.
    async fn analyze(
        &self,
        user_id: &str,
        candidate: FactCandidate,
    ) -> Result<AnalyzedCandidate, AppError> {
        let embedding = self.embedder.embed(&candidate.triple_text()).await?;

        let matches = self
            .vectors
            .query(
                embedding.clone(),
                JUDGE_CANDIDATES,
                &VectorFilter::with_type(user_id, RecordType::Fact),
                false,
            )
            .await?;

        if matches.is_empty() {
            return Ok(AnalyzedCandidate {
                candidate,
                judgment: FactJudgment::new(),
                embedding,
            });
        }

        let existing: Vec<JudgeCandidate> = matches
            .into_iter()
            .map(|m| JudgeCandidate {
                vector_id: m.id,
                text: m.record.text_content,
                valid_from: m.record.valid_from,
            })
            .collect();

        let judgment = match self.judge.judge(user_id, &candidate, &existing).await {
            Ok(judgment) => judgment,
            Err(err) => {
                warn!(error = %err, fact = %candidate.triple_text(), "fact analysis failed; treating as new");
                FactJudgment::new()
            }
        };

        Ok(AnalyzedCandidate {
            candidate,
            judgment,
            embedding,
        })
    }

    /// One transaction: close judge-selected targets, run the single-value
    /// guard for each insert, create the new rows.
    async fn apply_decisions(
        &self,
        user_id: &str,
        supersede_targets: &[String],
        to_insert: &[PlannedInsert],
    ) -> Result<(), AppError> {
        let mut response = self.db.client.query("BEGIN TRANSACTION;");

        for (i, target) in supersede_targets.iter().enumerate() {
            response = response
                .query(format!(
                    "UPDATE type::thing('{table}', $target_{i})
                     SET valid_until = time::now(), is_superseded = true, updated_at = time::now();",
                    table = Fact::table_name(),
                ))
                .bind((format!("target_{i}"), target.clone()));
        }

        for (i, planned) in to_insert.iter().enumerate() {
            // Deterministic safety net for single-value predicates: even a
            // judge that said NEW cannot leave two current rows behind.
            if planned.needs_guard {
                response = response
                    .query(format!(
                        "UPDATE {table}
                         SET valid_until = time::now(), is_superseded = true, updated_at = time::now()
                         WHERE user_id = $user_id
                           AND subject = $guard_subject_{i}
                           AND predicate = $guard_predicate_{i}
                           AND valid_until = NONE
                           AND is_superseded = false;",
                        table = Fact::table_name(),
                    ))
                    .bind((format!("guard_subject_{i}"), planned.fact.subject.clone()))
                    .bind((format!("guard_predicate_{i}"), planned.fact.predicate.clone()));
            }

            response = response
                .query(format!(
                    "CREATE type::thing('{table}', $fact_id_{i}) CONTENT $fact_{i};",
                    table = Fact::table_name(),
                ))
                .bind((format!("fact_id_{i}"), planned.fact.id.clone()))
                .bind((format!("fact_{i}"), planned.fact.clone()));
        }

        let response = response
            .query("COMMIT TRANSACTION;")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        response.check()?;

        Ok(())
    }
}
