use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A synthetic question/answer pair produced during enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

stored_object!(Chunk, "chunk", {
    memory_id: String,
    user_id: String,
    chunk_index: i64,
    text: String,
    embedding_id: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    generated_qas: Vec<QaPair>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default = "default_trust_score")]
    trust_score: f32,
    #[serde(default)]
    feedback_score: f32,
    #[serde(default)]
    tokens_count: i64
});

fn default_trust_score() -> f32 {
    0.5
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory_id: String,
        user_id: String,
        chunk_index: i64,
        text: String,
        embedding_id: String,
        summary: String,
        generated_qas: Vec<QaPair>,
        entities: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        let tokens_count = estimate_tokens(&text);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            memory_id,
            user_id,
            chunk_index,
            text,
            embedding_id: Some(embedding_id),
            summary,
            generated_qas,
            entities,
            trust_score: default_trust_score(),
            feedback_score: 0.0,
            tokens_count,
        }
    }

    /// Writes a batch of chunk rows in a single transaction so an ingestion
    /// retry never observes half a memory's chunks.
    pub async fn store_batch(chunks: &[Self], db: &SurrealDbClient) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut response = db.client.query("BEGIN TRANSACTION;");
        for (i, chunk) in chunks.iter().enumerate() {
            response = response
                .query(format!(
                    "CREATE type::thing('{table}', $id_{i}) CONTENT $chunk_{i};",
                    table = Self::table_name(),
                ))
                .bind((format!("id_{i}"), chunk.id.clone()))
                .bind((format!("chunk_{i}"), chunk.clone()));
        }
        let response = response.query("COMMIT TRANSACTION;").await?;
        response.check()?;

        Ok(())
    }

    pub async fn get_by_memory_id(
        memory_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE memory_id = $memory_id ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn get_by_embedding_ids(
        embedding_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        if embedding_ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE embedding_id IN $embedding_ids")
            .bind(("table", Self::table_name()))
            .bind(("embedding_ids", embedding_ids))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn delete_by_memory_id(
        memory_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE memory_id = $memory_id")
            .bind(("table", Self::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?;

        Ok(())
    }

    /// All chunks that claim to have a vector; the reconciler checks the claim.
    pub async fn with_embedding_ids(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE embedding_id != NONE")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(chunks)
    }
}

/// Rough token estimate, ~4 characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() / 4) as i64
}
