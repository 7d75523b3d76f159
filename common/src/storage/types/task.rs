use std::time::Duration;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Ingestion,
    Metadata,
    Dedupe,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Reserved,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reserved => "reserved",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

stored_object!(Task, "task", {
    user_id: String,
    memory_id: String,
    kind: TaskKind,
    state: TaskState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    scheduled_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    lease_expires_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    error_message: Option<String>
});

impl Task {
    pub fn new(kind: TaskKind, user_id: String, memory_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            memory_id,
            kind,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            lease_expires_at: None,
            worker_id: None,
            error_message: None,
        }
    }

    pub async fn enqueue(
        kind: TaskKind,
        user_id: &str,
        memory_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let task = Self::new(kind, user_id.to_string(), memory_id.to_string());
        let stored = db.store_item(task).await?;
        stored.ok_or_else(|| AppError::InternalError("Task failed to enqueue".into()))
    }

    /// Enqueues the task fan of a fresh submission. Metadata and dedupe run
    /// unconditionally; ingestion only once the memory is approved.
    pub async fn enqueue_for_submission(
        user_id: &str,
        memory_id: &str,
        ingest: bool,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        Self::enqueue(TaskKind::Metadata, user_id, memory_id, db).await?;
        Self::enqueue(TaskKind::Dedupe, user_id, memory_id, db).await?;
        if ingest {
            Self::enqueue(TaskKind::Ingestion, user_id, memory_id, db).await?;
        }
        Ok(())
    }

    /// Reserves the next runnable task for a worker. Eligible: pending,
    /// retryable failures whose backoff has elapsed, and tasks whose lease
    /// expired (at-least-once delivery after a worker death). The reserve is
    /// a conditional update, so two workers racing for the same candidate
    /// leave exactly one holding it.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Self>, AppError> {
        const ELIGIBLE: &str = "scheduled_at <= $now
                      AND (
                          state = 'pending'
                          OR (state = 'failed' AND attempts < max_attempts)
                          OR (state IN ['reserved', 'processing']
                              AND lease_expires_at != NONE
                              AND lease_expires_at <= $now)
                      )";

        let lease_until = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| AppError::InternalError(format!("invalid lease duration: {e}")))?;

        let candidate: Option<Self> = db
            .client
            .query(format!(
                "SELECT * FROM type::table($table)
                 WHERE {ELIGIBLE}
                 ORDER BY scheduled_at ASC
                 LIMIT 1"
            ))
            .bind(("table", Self::table_name()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .take(0)?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        // The WHERE re-checks eligibility: a candidate claimed in between
        // simply yields no row and the caller polls again.
        let task: Option<Self> = db
            .client
            .query(format!(
                "UPDATE type::thing($table, $id)
                 SET state = 'reserved',
                     worker_id = $worker_id,
                     lease_expires_at = $lease_until,
                     updated_at = $now
                 WHERE {ELIGIBLE}
                 RETURN AFTER"
            ))
            .bind(("table", Self::table_name()))
            .bind(("id", candidate.id))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .bind(("worker_id", worker_id.to_owned()))
            .bind(("lease_until", surrealdb::sql::Datetime::from(lease_until)))
            .await?
            .take(0)?;

        Ok(task)
    }

    pub async fn mark_processing(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = 'processing', attempts = attempts + 1, updated_at = time::now()
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .await?
            .take(0)?;

        updated.ok_or_else(|| AppError::NotFound("Task disappeared while claiming".into()))
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = 'succeeded', lease_expires_at = NONE, error_message = NONE,
                     updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .await?;
        Ok(())
    }

    /// Records a failure and schedules the retry after `delay`.
    pub async fn mark_failed(
        &self,
        error_message: String,
        delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let retry_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| AppError::InternalError(format!("invalid retry delay: {e}")))?;

        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = 'failed', error_message = $error, scheduled_at = $retry_at,
                     lease_expires_at = NONE, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("error", error_message))
            .bind(("retry_at", surrealdb::sql::Datetime::from(retry_at)))
            .await?;
        Ok(())
    }

    pub async fn mark_dead_letter(
        &self,
        error_message: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = 'dead_letter', error_message = $error, lease_expires_at = NONE,
                     updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("error", error_message))
            .await?;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub async fn for_memory(memory_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let tasks: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE memory_id = $memory_id")
            .bind(("table", Self::table_name()))
            .bind(("memory_id", memory_id.to_owned()))
            .await?
            .take(0)?;
        Ok(tasks)
    }
}
