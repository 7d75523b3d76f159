use std::sync::Arc;

use common::{
    error::AppError,
    utils::embedding::{cosine_similarity, EmbeddingProvider},
};
use futures::future::try_join_all;
use text_splitter::{ChunkConfig, TextSplitter};
use tokio::sync::Semaphore;
use tracing::warn;

/// Texts shorter than this become a single chunk.
pub const SINGLE_CHUNK_MAX_CHARS: usize = 500;
/// Texts shorter than this go through the recursive splitter; longer ones
/// are chunked semantically.
pub const RECURSIVE_MAX_CHARS: usize = 3000;

const RECURSIVE_CHUNK_SIZE: usize = 1000;
const RECURSIVE_OVERLAP: usize = 200;

/// Adjacent-sentence similarity below which a semantic boundary may close.
const SEMANTIC_BREAK_SIMILARITY: f32 = 0.5;
/// A buffer must be at least this long before a similarity break closes it.
const SEMANTIC_MIN_CHUNK_CHARS: usize = 150;
/// A buffer never grows past this; it closes eagerly regardless of similarity.
const SEMANTIC_MAX_CHUNK_CHARS: usize = 2000;

const SENTENCE_EMBED_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkingPath {
    Single,
    Recursive,
    Semantic,
}

/// Size-based routing: tiny texts stay whole, mid-size texts get the
/// overlap splitter, long texts get semantic boundaries.
pub fn chunking_path(text: &str) -> ChunkingPath {
    let chars = text.chars().count();
    if chars < SINGLE_CHUNK_MAX_CHARS {
        ChunkingPath::Single
    } else if chars < RECURSIVE_MAX_CHARS {
        ChunkingPath::Recursive
    } else {
        ChunkingPath::Semantic
    }
}

pub async fn chunk_text(
    text: &str,
    embedder: &EmbeddingProvider,
) -> Result<Vec<String>, AppError> {
    match chunking_path(text) {
        ChunkingPath::Single => Ok(vec![text.to_string()]),
        ChunkingPath::Recursive => recursive_split(text),
        ChunkingPath::Semantic => match semantic_chunks(text, embedder).await {
            Ok(chunks) => Ok(chunks),
            Err(err) => {
                // Embedding hiccups degrade to the recursive splitter rather
                // than failing the whole ingestion.
                warn!(error = %err, "semantic chunking failed; using recursive splitter");
                recursive_split(text)
            }
        },
    }
}

/// Recursive splitter: paragraph, then line, then sentence, then word,
/// targeting 1000 characters with 200 overlap.
fn recursive_split(text: &str) -> Result<Vec<String>, AppError> {
    let chunk_config = ChunkConfig::new(RECURSIVE_CHUNK_SIZE)
        .with_overlap(RECURSIVE_OVERLAP)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let mut chunks: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();
    if chunks.is_empty() {
        chunks.push(text.to_string());
    }

    Ok(chunks)
}

/// Splits on terminal punctuation followed by whitespace, keeping the
/// punctuation with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') {
            let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if at_boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

/// Embeds every sentence in parallel, then walks the list closing a buffer
/// whenever adjacent similarity drops below the threshold (once the buffer
/// is long enough) or the buffer would outgrow its cap.
async fn semantic_chunks(
    text: &str,
    embedder: &EmbeddingProvider,
) -> Result<Vec<String>, AppError> {
    let sentences = split_sentences(text);

    if sentences.is_empty() {
        return Ok(Vec::new());
    }
    if sentences.len() == 1 {
        return Ok(sentences);
    }

    let semaphore = Arc::new(Semaphore::new(SENTENCE_EMBED_CONCURRENCY));
    let embeddings = try_join_all(sentences.iter().map(|sentence| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| AppError::InternalError(format!("semaphore closed: {e}")))?;
            embedder.embed(sentence).await
        }
    }))
    .await?;

    let similarities: Vec<f32> = embeddings
        .windows(2)
        .map(|pair| cosine_similarity(&pair[0], &pair[1]))
        .collect();

    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = vec![&sentences[0]];

    for (i, sentence) in sentences.iter().enumerate().skip(1) {
        let similarity = similarities.get(i - 1).copied().unwrap_or(1.0);
        let buffer_len = buffer.join(" ").chars().count();

        if similarity < SEMANTIC_BREAK_SIMILARITY && buffer_len > SEMANTIC_MIN_CHUNK_CHARS {
            chunks.push(buffer.join(" "));
            buffer = vec![sentence];
        } else if buffer_len + sentence.chars().count() > SEMANTIC_MAX_CHUNK_CHARS {
            chunks.push(buffer.join(" "));
            buffer = vec![sentence];
        } else {
            buffer.push(sentence);
        }
    }

    if !buffer.is_empty() {
        chunks.push(buffer.join(" "));
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        std::iter::repeat("word")
            .take(count)
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_path_selection_boundaries() {
        assert_eq!(chunking_path(&"x".repeat(499)), ChunkingPath::Single);
        assert_eq!(chunking_path(&"x".repeat(500)), ChunkingPath::Recursive);
        assert_eq!(chunking_path(&"x".repeat(2999)), ChunkingPath::Recursive);
        assert_eq!(chunking_path(&"x".repeat(3000)), ChunkingPath::Semantic);
        assert_eq!(chunking_path(&"x".repeat(3001)), ChunkingPath::Semantic);
    }

    #[tokio::test]
    async fn test_499_char_text_is_one_chunk() {
        let embedder = EmbeddingProvider::new_hashed(32);
        let text = "a".repeat(499);
        let chunks = chunk_text(&text, &embedder).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[tokio::test]
    async fn test_mid_size_text_splits_with_bounded_chunks() {
        let embedder = EmbeddingProvider::new_hashed(32);
        // ~2500 chars of sentence-shaped text.
        let text = format!("{}. ", words(8)).repeat(60);
        assert_eq!(chunking_path(&text), ChunkingPath::Recursive);

        let chunks = chunk_text(&text, &embedder).await.unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
    }

    #[tokio::test]
    async fn test_3001_char_text_takes_the_semantic_path() {
        let embedder = EmbeddingProvider::new_hashed(64);
        let sentence = format!("{}. ", words(10));
        let mut text = sentence.repeat(3001 / sentence.len() + 1);
        text.truncate(3001);
        assert_eq!(chunking_path(&text), ChunkingPath::Semantic);

        let chunks = chunk_text(&text, &embedder).await.unwrap();
        assert!(!chunks.is_empty());
        // Repeated identical sentences never break on similarity, so the
        // 2000-char cap is what bounds each chunk.
        assert!(chunks
            .iter()
            .all(|c| c.chars().count() <= SEMANTIC_MAX_CHUNK_CHARS + 100));
    }

    #[test]
    fn test_split_sentences_on_terminal_punctuation() {
        let text = "First sentence. Second one? Third! No terminal tail";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec![
                "First sentence.",
                "Second one?",
                "Third!",
                "No terminal tail"
            ]
        );
    }

    #[test]
    fn test_split_sentences_keeps_inline_dots() {
        let sentences = split_sentences("Version 1.5 shipped today. It works.");
        assert_eq!(sentences, vec!["Version 1.5 shipped today.", "It works."]);
    }

    #[tokio::test]
    async fn test_semantic_chunking_breaks_on_topic_shift() {
        let embedder = EmbeddingProvider::new_hashed(64);

        // Two topic blocks with no shared vocabulary; each block is long
        // enough (> 150 chars) that the low-similarity boundary can close.
        let travel: Vec<String> = (0..6)
            .map(|i| format!("Tokyo travel itinerary day {i} includes temples museums gardens."))
            .collect();
        let cooking: Vec<String> = (0..6)
            .map(|i| format!("Sourdough starter feeding schedule week {i} requires flour water."))
            .collect();
        let text = format!("{} {}", travel.join(" "), cooking.join(" "));

        let chunks = semantic_chunks(&text, &embedder).await.unwrap();
        assert!(
            chunks.len() >= 2,
            "expected a semantic boundary between topics, got {chunks:?}"
        );
        assert!(chunks[0].contains("Tokyo"));
        assert!(chunks.last().unwrap().contains("Sourdough"));
    }

    #[tokio::test]
    async fn test_semantic_chunking_caps_buffer_size() {
        let embedder = EmbeddingProvider::new_hashed(64);
        // Identical sentences: similarity 1.0 throughout, so only the size
        // cap produces boundaries.
        let sentence = "The same sentence keeps repeating in this block of text.";
        let text = std::iter::repeat(sentence)
            .take(80)
            .collect::<Vec<_>>()
            .join(" ");

        let chunks = semantic_chunks(&text, &embedder).await.unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= SEMANTIC_MAX_CHUNK_CHARS + sentence.len());
        }
    }
}
