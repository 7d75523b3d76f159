use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Predicates where a subject holds at most one current object. Names are
/// matched loosely (case and underscores ignored) since extraction output
/// varies between `livesIn` and `lives_in`.
pub const SINGLE_VALUE_PREDICATES: [&str; 11] = [
    "lives_in",
    "located_in",
    "current_role",
    "job_title",
    "employer",
    "current_status",
    "location",
    "phone_number",
    "email_address",
    "is_active",
    "age",
];

pub fn is_single_value_predicate(predicate: &str) -> bool {
    let normalized = normalize_predicate(predicate);
    SINGLE_VALUE_PREDICATES
        .iter()
        .any(|p| normalize_predicate(p) == normalized)
}

fn normalize_predicate(predicate: &str) -> String {
    predicate
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

stored_object!(Fact, "fact", {
    user_id: String,
    subject: String,
    predicate: String,
    object: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    source_memory_id: Option<String>,
    source_chunk_id: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    valid_from: DateTime<Utc>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    valid_until: Option<DateTime<Utc>>,
    location: Option<String>,
    #[serde(default)]
    is_superseded: bool
});

fn default_confidence() -> f32 {
    1.0
}

impl Fact {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        subject: String,
        predicate: String,
        object: String,
        confidence: f32,
        source_memory_id: Option<String>,
        source_chunk_id: Option<String>,
        valid_from: Option<DateTime<Utc>>,
        location: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            subject,
            predicate,
            object,
            confidence: confidence.clamp(0.0, 1.0),
            source_memory_id,
            source_chunk_id,
            valid_from: valid_from.unwrap_or(now),
            valid_until: None,
            location,
            is_superseded: false,
        }
    }

    /// A fact is current while nothing has closed its validity interval.
    pub fn is_current(&self) -> bool {
        self.valid_until.is_none() && !self.is_superseded
    }

    pub fn triple_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }

    pub fn normalized_triple(&self) -> String {
        self.triple_text().to_lowercase().trim().to_string()
    }

    /// The id this fact carries in the vector store.
    pub fn vector_id(&self) -> String {
        format!("fact_{}", self.id)
    }

    /// Normalizes a judge-returned or vector-store id of the form `fact_<k>`
    /// back to the relational id.
    pub fn parse_vector_id(id: &str) -> Option<String> {
        id.strip_prefix("fact_").map(str::to_string)
    }

    pub async fn current_by_ids(
        user_id: &str,
        ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let facts: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND valid_until = NONE
                   AND is_superseded = false
                   AND record::id(id) IN $ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("ids", ids))
            .await?
            .take(0)?;

        Ok(facts)
    }

    pub async fn current_matching(
        user_id: &str,
        subject: &str,
        predicate: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let facts: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND subject = $subject
                   AND predicate = $predicate
                   AND valid_until = NONE
                   AND is_superseded = false",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("subject", subject.to_owned()))
            .bind(("predicate", predicate.to_owned()))
            .await?
            .take(0)?;

        Ok(facts)
    }

    /// Closes a specific fact's validity interval (judge-directed supersession).
    pub async fn supersede_by_id(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET valid_until = time::now(), is_superseded = true, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .await?;

        Ok(())
    }

    /// Marks facts as superseded without closing `valid_until`; used by the
    /// retrieval-time passive cleanup of fuzzy duplicates.
    pub async fn mark_superseded(ids: Vec<String>, db: &SurrealDbClient) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        db.client
            .query(
                "UPDATE type::table($table)
                 SET is_superseded = true, updated_at = time::now()
                 WHERE record::id(id) IN $ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("ids", ids))
            .await?;

        Ok(())
    }

    /// The deterministic single-value guard: closes every current fact with
    /// the same `(user, subject, predicate)` so at most one survives the
    /// insert that follows, regardless of what the judge decided.
    pub async fn supersede_current(
        user_id: &str,
        subject: &str,
        predicate: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::table($table)
                 SET valid_until = time::now(), is_superseded = true, updated_at = time::now()
                 WHERE user_id = $user_id
                   AND subject = $subject
                   AND predicate = $predicate
                   AND valid_until = NONE
                   AND is_superseded = false",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("subject", subject.to_owned()))
            .bind(("predicate", predicate.to_owned()))
            .await?;

        Ok(())
    }

    /// Idempotency probe for the fact-extraction write phase.
    pub async fn exists_duplicate(
        user_id: &str,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: DateTime<Utc>,
        source_chunk_id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let existing: Option<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND subject = $subject
                   AND predicate = $predicate
                   AND object = $object
                   AND valid_from = $valid_from
                   AND source_chunk_id = $source_chunk_id
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("subject", subject.to_owned()))
            .bind(("predicate", predicate.to_owned()))
            .bind(("object", object.to_owned()))
            .bind(("valid_from", surrealdb::sql::Datetime::from(valid_from)))
            .bind(("source_chunk_id", source_chunk_id.map(str::to_string)))
            .await?
            .take(0)?;

        Ok(existing.is_some())
    }

    pub async fn get_by_memory_id(
        memory_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let facts: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE source_memory_id = $memory_id")
            .bind(("table", Self::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?
            .take(0)?;

        Ok(facts)
    }

    pub async fn delete_by_memory_id(
        memory_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE source_memory_id = $memory_id")
            .bind(("table", Self::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?;

        Ok(())
    }
}
