use std::sync::Arc;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::types::fact::Fact;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    MemoryChunk,
    Fact,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemoryChunk => "memory_chunk",
            Self::Fact => "fact",
        }
    }
}

stored_object!(VectorRecord, "vector_record", {
    user_id: String,
    record_type: RecordType,
    #[serde(default)]
    embedding: Vec<f32>,
    text_content: String,
    memory_id: Option<String>,
    chunk_index: Option<i64>,
    fact_id: Option<String>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
    source: Option<String>
});

impl VectorRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn for_chunk(
        id: String,
        embedding: Vec<f32>,
        user_id: String,
        memory_id: String,
        chunk_index: i64,
        text_content: String,
        tags: Vec<String>,
        source: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            user_id,
            record_type: RecordType::MemoryChunk,
            embedding,
            text_content,
            memory_id: Some(memory_id),
            chunk_index: Some(chunk_index),
            fact_id: None,
            valid_from: None,
            tags,
            source,
        }
    }

    /// Fact records are addressed as `fact_<k>` so retrieval can map hits
    /// straight back to relational rows.
    pub fn for_fact(fact: &Fact, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: fact.vector_id(),
            created_at: now,
            updated_at: now,
            user_id: fact.user_id.clone(),
            record_type: RecordType::Fact,
            embedding,
            text_content: fact.triple_text(),
            memory_id: None,
            chunk_index: None,
            fact_id: Some(fact.id.clone()),
            valid_from: Some(fact.valid_from),
            tags: Vec::new(),
            source: Some("ingestion".to_string()),
        }
    }
}

/// Filter applied inside the KNN query. `user_id` is always required; vectors
/// never cross user boundaries.
#[derive(Debug, Clone)]
pub struct VectorFilter {
    pub user_id: String,
    pub record_type: Option<RecordType>,
}

impl VectorFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            record_type: None,
        }
    }

    pub fn with_type(user_id: &str, record_type: RecordType) -> Self {
        Self {
            user_id: user_id.to_string(),
            record_type: Some(record_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity, higher is better.
    pub score: f32,
    pub record: VectorRecord,
}

/// Content-addressed vector store over the `vector_record` table.
///
/// The relational side owns canonical ids; this table is a derived cache and
/// can always be rebuilt from chunk and fact rows by the reconciler.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<SurrealDbClient>,
}

impl VectorStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Idempotent on id: re-upserting a record replaces it in place.
    pub async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), AppError> {
        for record in records {
            let id = record.id.clone();
            let _stored: Option<VectorRecord> = self
                .db
                .client
                .upsert((VectorRecord::table_name(), id))
                .content(record)
                .await?;
        }
        Ok(())
    }

    pub async fn query(
        &self,
        embedding: Vec<f32>,
        k: usize,
        filter: &VectorFilter,
        include_values: bool,
    ) -> Result<Vec<VectorMatch>, AppError> {
        #[derive(Deserialize)]
        struct MatchRow {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            id: String,
            #[serde(deserialize_with = "deserialize_datetime", default)]
            created_at: DateTime<Utc>,
            #[serde(deserialize_with = "deserialize_datetime", default)]
            updated_at: DateTime<Utc>,
            user_id: String,
            record_type: RecordType,
            #[serde(default)]
            embedding: Vec<f32>,
            text_content: String,
            memory_id: Option<String>,
            chunk_index: Option<i64>,
            fact_id: Option<String>,
            #[serde(deserialize_with = "deserialize_option_datetime", default)]
            valid_from: Option<DateTime<Utc>>,
            #[serde(default)]
            tags: Vec<String>,
            source: Option<String>,
            score: f32,
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let type_clause = if filter.record_type.is_some() {
            "AND record_type = $record_type"
        } else {
            ""
        };
        let sql = format!(
            "SELECT *, vector::similarity::cosine(embedding, $embedding) AS score
             FROM {table}
             WHERE user_id = $user_id
               {type_clause}
               AND embedding <|{k},100|> $embedding
             ORDER BY score DESC
             LIMIT {k}",
            table = VectorRecord::table_name(),
        );

        let mut request = self
            .db
            .client
            .query(&sql)
            .bind(("embedding", embedding))
            .bind(("user_id", filter.user_id.clone()));
        if let Some(record_type) = filter.record_type {
            request = request.bind(("record_type", record_type));
        }

        let mut response = request
            .await
            .map_err(|e| AppError::InternalError(format!("Vector query failed: {e}")))?;

        let rows: Vec<MatchRow> = response.take::<Vec<MatchRow>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|row| {
                let embedding = if include_values {
                    row.embedding
                } else {
                    Vec::new()
                };
                VectorMatch {
                    id: row.id.clone(),
                    score: row.score,
                    record: VectorRecord {
                        id: row.id,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                        user_id: row.user_id,
                        record_type: row.record_type,
                        embedding,
                        text_content: row.text_content,
                        memory_id: row.memory_id,
                        chunk_index: row.chunk_index,
                        fact_id: row.fact_id,
                        valid_from: row.valid_from,
                        tags: row.tags,
                        source: row.source,
                    },
                }
            })
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<VectorRecord>, AppError> {
        Ok(self.db.get_item(id).await?)
    }

    pub async fn delete_ids(&self, ids: Vec<String>) -> Result<(), AppError> {
        for id in ids {
            let _removed: Option<VectorRecord> = self.db.delete_item(&id).await?;
        }
        Ok(())
    }

    /// Removes every vector derived from a memory, chunks and facts alike.
    /// Runs before the relational rows go away so no vector outlives its row.
    pub async fn delete_by_memory_id(&self, memory_id: &str) -> Result<(), AppError> {
        self.db
            .client
            .query("DELETE type::table($table) WHERE memory_id = $memory_id")
            .bind(("table", VectorRecord::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?;
        Ok(())
    }

    /// All chunk-typed records, for the reconciler's orphan sweep.
    pub async fn chunk_records(&self) -> Result<Vec<VectorRecord>, AppError> {
        let records: Vec<VectorRecord> = self
            .db
            .client
            .query("SELECT * FROM type::table($table) WHERE record_type = 'memory_chunk'")
            .bind(("table", VectorRecord::table_name()))
            .await?
            .take(0)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup() -> (SurrealDbClient, VectorStore) {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3).await.expect("init");
        let store = VectorStore::new(Arc::new(db.clone()));
        (db, store)
    }

    fn chunk_record(id: &str, user_id: &str, memory_id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord::for_chunk(
            id.to_string(),
            embedding,
            user_id.to_string(),
            memory_id.to_string(),
            0,
            format!("text for {id}"),
            vec![],
            Some("user".to_string()),
        )
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_id() {
        let (db, store) = setup().await;

        let record = chunk_record("vec-1", "u1", "m1", vec![1.0, 0.0, 0.0]);
        store.upsert(vec![record.clone()]).await.expect("first");

        let mut replacement = record.clone();
        replacement.text_content = "revised".to_string();
        store.upsert(vec![replacement]).await.expect("second");

        let all: Vec<VectorRecord> = db.get_all_stored_items().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text_content, "revised");
    }

    #[tokio::test]
    async fn test_query_filters_by_user_and_type() {
        let (_db, store) = setup().await;

        let fact = Fact::new(
            "u1".into(),
            "User".into(),
            "lives_in".into(),
            "Tokyo".into(),
            1.0,
            None,
            None,
            None,
            None,
        );

        store
            .upsert(vec![
                chunk_record("vec-chunk", "u1", "m1", vec![1.0, 0.0, 0.0]),
                VectorRecord::for_fact(&fact, vec![0.9, 0.1, 0.0]),
                chunk_record("vec-other-user", "u2", "m9", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .expect("upsert");

        let all_for_user = store
            .query(
                vec![1.0, 0.0, 0.0],
                10,
                &VectorFilter::for_user("u1"),
                false,
            )
            .await
            .expect("query");
        assert_eq!(all_for_user.len(), 2);
        assert!(all_for_user.iter().all(|m| m.record.user_id == "u1"));

        let facts_only = store
            .query(
                vec![1.0, 0.0, 0.0],
                10,
                &VectorFilter::with_type("u1", RecordType::Fact),
                false,
            )
            .await
            .expect("query");
        assert_eq!(facts_only.len(), 1);
        assert_eq!(facts_only[0].id, fact.vector_id());
        assert_eq!(facts_only[0].record.fact_id.as_deref(), Some(fact.id.as_str()));
        assert!(facts_only[0].record.valid_from.is_some());
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity_and_respects_include_values() {
        let (_db, store) = setup().await;

        store
            .upsert(vec![
                chunk_record("vec-near", "u1", "m1", vec![0.0, 1.0, 0.0]),
                chunk_record("vec-far", "u1", "m2", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .expect("upsert");

        let hits = store
            .query(vec![0.0, 1.0, 0.0], 2, &VectorFilter::for_user("u1"), true)
            .await
            .expect("query");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "vec-near");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].record.embedding.len(), 3);

        let without_values = store
            .query(vec![0.0, 1.0, 0.0], 2, &VectorFilter::for_user("u1"), false)
            .await
            .expect("query");
        assert!(without_values[0].record.embedding.is_empty());
        // The canonical text still comes back intact either way.
        assert_eq!(without_values[0].record.text_content, "text for vec-near");
    }

    #[tokio::test]
    async fn test_delete_by_memory_id_removes_only_that_memory() {
        let (_db, store) = setup().await;

        store
            .upsert(vec![
                chunk_record("vec-m1-a", "u1", "m1", vec![1.0, 0.0, 0.0]),
                chunk_record("vec-m1-b", "u1", "m1", vec![0.0, 1.0, 0.0]),
                chunk_record("vec-m2", "u1", "m2", vec![0.0, 0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        store.delete_by_memory_id("m1").await.expect("delete");

        assert!(store.get("vec-m1-a").await.expect("get").is_none());
        assert!(store.get("vec-m1-b").await.expect("get").is_none());
        assert!(store.get("vec-m2").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_delete_ids() {
        let (_db, store) = setup().await;

        store
            .upsert(vec![chunk_record("vec-x", "u1", "m1", vec![1.0, 0.0, 0.0])])
            .await
            .expect("upsert");

        store
            .delete_ids(vec!["vec-x".to_string(), "vec-missing".to_string()])
            .await
            .expect("delete");
        assert!(store.get("vec-x").await.expect("get").is_none());
    }
}
