use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Backend-agnostic embedding generation.
///
/// Production uses the OpenAI-compatible endpoint configured in `AppConfig`.
/// Tests use the hashed backend: a deterministic bag-of-words projection with
/// no network dependency, so similarity of overlapping texts is stable.
pub enum EmbeddingProvider {
    OpenAi {
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimensions: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        Self::OpenAi {
            client,
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }

    pub fn new_hashed(dimensions: usize) -> Self {
        Self::Hashed { dimensions }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimensions, .. } => *dimensions as usize,
            Self::Hashed { dimensions } => *dimensions,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Hashed { .. } => "hashed",
        }
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Self::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
                let embedding = Retry::spawn(retry_strategy, || {
                    generate_embedding_with_params(client, input, model, *dimensions)
                })
                .await?;

                if embedding.len() != *dimensions as usize {
                    return Err(AppError::InternalError(format!(
                        "embedding has dimension {} but {} was requested",
                        embedding.len(),
                        dimensions
                    )));
                }

                Ok(embedding)
            }
            Self::Hashed { dimensions } => Ok(hashed_embedding(input, *dimensions)),
        }
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut embeddings = Vec::with_capacity(inputs.len());
        for input in inputs {
            embeddings.push(self.embed(input).await?);
        }
        Ok(embeddings)
    }
}

/// Generates an embedding vector using a specific model and dimension.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}

/// Cosine similarity between two vectors, zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator <= f32::EPSILON {
        return 0.0;
    }

    dot / denominator
}

/// Deterministic bag-of-words projection used by the hashed test backend.
/// Each lowercased word is hashed into a bucket; the result is L2-normalized
/// so cosine similarity behaves like the real thing for overlapping texts.
fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions.max(1)];

    for word in input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() % vector.len() as u64) as usize;
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_embedding_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(64);
        let a = futures::executor::block_on(provider.embed("I moved to Tokyo")).unwrap();
        let b = futures::executor::block_on(provider.embed("I moved to Tokyo")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hashed_embedding_tracks_word_overlap() {
        let provider = EmbeddingProvider::new_hashed(128);
        let base = futures::executor::block_on(provider.embed("the cat sat on the mat")).unwrap();
        let near =
            futures::executor::block_on(provider.embed("the cat sat on the blue mat")).unwrap();
        let far = futures::executor::block_on(provider.embed("quarterly revenue grew")).unwrap();

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }
}
