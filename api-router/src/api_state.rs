use std::sync::Arc;

use common::{
    llm::{gateway::LlmGateway, usage::UsageTracker},
    notifier::Notifier,
    storage::{db::SurrealDbClient, vector::VectorStore},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use retrieval_pipeline::RetrievalContext;

use crate::rate_limit::DropRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub vectors: VectorStore,
    pub embedder: Arc<EmbeddingProvider>,
    pub gateway: Arc<dyn LlmGateway>,
    pub usage: UsageTracker,
    pub notifier: Arc<Notifier>,
    pub retrieval: RetrievalContext,
    pub drop_limiter: Arc<DropRateLimiter>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        embedder: Arc<EmbeddingProvider>,
        gateway: Arc<dyn LlmGateway>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let vectors = VectorStore::new(Arc::clone(&db));
        let usage = UsageTracker::new(Arc::clone(&db), config.max_daily_tokens);
        let retrieval =
            RetrievalContext::new(Arc::clone(&db), vectors.clone(), Arc::clone(&embedder));

        Self {
            db,
            config,
            vectors,
            embedder,
            gateway,
            usage,
            notifier,
            retrieval,
            drop_limiter: Arc::new(DropRateLimiter::default()),
        }
    }
}
