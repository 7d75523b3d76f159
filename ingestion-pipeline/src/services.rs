use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    llm::{gateway::LlmGateway, ChunkEnrichment, FactCandidate},
    utils::embedding::EmbeddingProvider,
};

use crate::chunking;

/// The pipeline's view of the outside world. Everything that talks to an LLM
/// or embedding model sits behind this trait so pipeline behavior is testable
/// with canned responses.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn chunk_text(&self, text: &str) -> Result<Vec<String>, AppError>;

    async fn enrich_chunk(
        &self,
        user_id: &str,
        chunk_text: &str,
    ) -> Result<ChunkEnrichment, AppError>;

    async fn extract_facts(
        &self,
        user_id: &str,
        chunk_text: &str,
        reference_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<FactCandidate>, AppError>;

    async fn suggest_tags(
        &self,
        user_id: &str,
        content: &str,
        existing_tags: &[String],
    ) -> Result<Vec<String>, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

pub struct DefaultPipelineServices {
    gateway: Arc<dyn LlmGateway>,
    embedder: Arc<EmbeddingProvider>,
}

impl DefaultPipelineServices {
    pub fn new(gateway: Arc<dyn LlmGateway>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { gateway, embedder }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn chunk_text(&self, text: &str) -> Result<Vec<String>, AppError> {
        chunking::chunk_text(text, &self.embedder).await
    }

    async fn enrich_chunk(
        &self,
        user_id: &str,
        chunk_text: &str,
    ) -> Result<ChunkEnrichment, AppError> {
        self.gateway.enrich(user_id, chunk_text).await
    }

    async fn extract_facts(
        &self,
        user_id: &str,
        chunk_text: &str,
        reference_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<FactCandidate>, AppError> {
        self.gateway
            .extract_facts(user_id, chunk_text, reference_date)
            .await
    }

    async fn suggest_tags(
        &self,
        user_id: &str,
        content: &str,
        existing_tags: &[String],
    ) -> Result<Vec<String>, AppError> {
        self.gateway
            .suggest_tags(user_id, content, existing_tags)
            .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(text).await
    }
}
