#![allow(clippy::missing_docs_in_private_items)]

pub mod episodic;
pub mod scoring;
pub mod semantic;
pub mod state;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::Chunk, vector::VectorStore},
    utils::embedding::EmbeddingProvider,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Which view of the corpus a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchView {
    #[default]
    Auto,
    Semantic,
    State,
    Episodic,
}

/// Policy knobs for retrieval; the defaults match production behavior, tests
/// and evaluations can turn them.
#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    /// MMR balance: low values favor diversity over raw relevance.
    pub mmr_lambda: f32,
    /// Semantic view over-fetch factor before MMR runs.
    pub semantic_fetch_multiplier: usize,
    /// State view over-fetch factor before hydration.
    pub state_fetch_multiplier: usize,
    /// Word-overlap ratio above which two texts are the same result.
    pub jaccard_dedupe_threshold: f32,
    /// Char-ratio above which two same-dated triples are cleanup candidates.
    pub cleanup_similarity_threshold: f64,
    pub recency_bonus_30d: f32,
    pub recency_bonus_90d: f32,
    pub recency_bonus_365d: f32,
    /// How many state hits lead the auto view.
    pub auto_state_k: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            mmr_lambda: 0.3,
            semantic_fetch_multiplier: 10,
            state_fetch_multiplier: 4,
            jaccard_dedupe_threshold: 0.85,
            cleanup_similarity_threshold: 0.9,
            recency_bonus_30d: 0.5,
            recency_bonus_90d: 0.3,
            recency_bonus_365d: 0.1,
            auto_state_k: 3,
        }
    }
}

/// Everything the planner needs to resolve a query.
#[derive(Clone)]
pub struct RetrievalContext {
    pub db: Arc<SurrealDbClient>,
    pub vectors: VectorStore,
    pub embedder: Arc<EmbeddingProvider>,
    pub tuning: RetrievalTuning,
}

impl RetrievalContext {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vectors: VectorStore,
        embedder: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            tuning: RetrievalTuning::default(),
        }
    }
}

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
    pub chunk: Option<Chunk>,
}

/// The planner entry point: dispatches to one view, or blends state and
/// semantic for `auto`. State hits lead the auto blend (current truth beats
/// similarity) and the two lists are not cross-deduplicated.
#[instrument(skip_all, fields(user_id, view = ?view, top_k))]
pub async fn search(
    ctx: &RetrievalContext,
    query: &str,
    user_id: &str,
    top_k: usize,
    view: SearchView,
) -> Result<Vec<SearchHit>, AppError> {
    match view {
        SearchView::State => state::search_state(ctx, query, user_id, top_k).await,
        SearchView::Episodic => episodic::search_episodic(ctx, query, user_id, top_k).await,
        SearchView::Semantic => semantic::search_semantic(ctx, query, user_id, top_k).await,
        SearchView::Auto => {
            let mut hits =
                state::search_state(ctx, query, user_id, ctx.tuning.auto_state_k).await?;
            let semantic_hits = semantic::search_semantic(ctx, query, user_id, top_k).await?;
            hits.extend(semantic_hits);
            Ok(hits)
        }
    }
}
