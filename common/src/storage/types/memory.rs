use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::user::User;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Pending,
    Approved,
    Discarded,
    Archived,
}

impl MemoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Discarded => "discarded",
            Self::Archived => "archived",
        }
    }

    /// Only approved memories carry chunks and vectors.
    pub fn is_ingestable(self) -> bool {
        matches!(self, Self::Approved)
    }
}

stored_object!(Memory, "memory", {
    user_id: String,
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    status: MemoryStatus,
    show_in_inbox: bool,
    #[serde(default)]
    trusted: bool,
    source_llm: Option<String>,
    job_id: Option<String>,
    embedding_id: Option<String>
});

impl Memory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        title: String,
        content: String,
        tags: Vec<String>,
        status: MemoryStatus,
        show_in_inbox: bool,
        trusted: bool,
        source_llm: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
            content,
            tags,
            status,
            show_in_inbox,
            trusted,
            source_llm,
            job_id: None,
            embedding_id: None,
        }
    }

    /// Builds a memory from a user submission, applying the auto-approve
    /// setting and the backdating rule: a supplied `created_at` is honored
    /// only when the submission is tagged `memorybench`.
    pub fn from_submission(
        user: &User,
        title: String,
        content: String,
        tags: Vec<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        let status = if user.settings.auto_approve {
            MemoryStatus::Approved
        } else {
            MemoryStatus::Pending
        };

        // Approved submissions skip the inbox; pending ones wait there.
        let show_in_inbox = !matches!(status, MemoryStatus::Approved);

        let mut memory = Self::new(
            user.id.clone(),
            title,
            content,
            tags,
            status,
            show_in_inbox,
            true,
            Some("user".to_string()),
        );

        let backdate_allowed = memory
            .tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case("memorybench"));
        if let (true, Some(requested)) = (backdate_allowed, created_at) {
            memory.created_at = requested;
            memory.updated_at = requested;
        }

        memory
    }

    /// Builds a pending inbox item from an agent drop.
    pub fn from_agent_drop(
        user_id: String,
        title: Option<String>,
        content: String,
        job_id: Option<String>,
    ) -> Self {
        let mut memory = Self::new(
            user_id,
            title.unwrap_or_else(|| "AI Agent Drop".to_string()),
            content,
            Vec::new(),
            MemoryStatus::Pending,
            true,
            false,
            Some("agent_drop".to_string()),
        );
        memory.job_id = job_id;
        memory
    }

    /// Fetches a memory and verifies ownership.
    pub async fn get_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let memory: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Memory not found".into()))?;

        if memory.user_id != user_id {
            return Err(AppError::Auth("Access denied".into()));
        }

        Ok(memory)
    }

    pub async fn set_status(
        id: &str,
        status: MemoryStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _memory: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    pub async fn set_show_in_inbox(
        id: &str,
        show_in_inbox: bool,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _memory: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/show_in_inbox", show_in_inbox))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    pub async fn set_content(
        id: &str,
        content: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _memory: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/content", content))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    /// Legacy pointer to the first chunk's vector, used by delete paths.
    pub async fn set_embedding_id(
        id: &str,
        embedding_id: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _memory: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/embedding_id", embedding_id))
            .await?;
        Ok(())
    }

    pub async fn set_tags(
        id: &str,
        tags: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _memory: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/tags", tags))
            .await?;
        Ok(())
    }

    pub async fn inbox_items(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let items: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id AND show_in_inbox = true ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?
            .take(0)?;

        Ok(items)
    }

    pub async fn by_ids(ids: Vec<String>, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let items: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE record::id(id) IN $ids")
            .bind(("table", Self::table_name()))
            .bind(("ids", ids))
            .await?
            .take(0)?;

        Ok(items)
    }

    /// Case-insensitive substring recall over memory bodies, newest first.
    pub async fn search_content(
        user_id: &str,
        needle: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let items: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND string::contains(string::lowercase(content), string::lowercase($needle))
                 ORDER BY created_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("needle", needle.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::user::UserSettings;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    fn test_user(auto_approve: bool) -> User {
        let mut user = User::new("memory_test@example.com".into(), "UTC".into());
        user.settings = UserSettings {
            auto_approve,
            daily_token_budget: None,
        };
        user
    }

    #[tokio::test]
    async fn test_submission_with_auto_approve() {
        let user = test_user(true);
        let memory = Memory::from_submission(&user, "t".into(), "c".into(), vec![], None);

        assert_eq!(memory.status, MemoryStatus::Approved);
        assert!(!memory.show_in_inbox);
        assert!(memory.trusted);
        assert_eq!(memory.source_llm.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_submission_without_auto_approve_lands_in_inbox() {
        let user = test_user(false);
        let memory = Memory::from_submission(&user, "t".into(), "c".into(), vec![], None);

        assert_eq!(memory.status, MemoryStatus::Pending);
        assert!(memory.show_in_inbox);
    }

    #[tokio::test]
    async fn test_backdating_requires_memorybench_tag() {
        let user = test_user(true);
        let requested: DateTime<Utc> = "2020-01-01T12:00:00Z".parse().unwrap();

        let backdated = Memory::from_submission(
            &user,
            "t".into(),
            "c".into(),
            vec!["MemoryBench".into()],
            Some(requested),
        );
        assert_eq!(backdated.created_at, requested);

        let untagged =
            Memory::from_submission(&user, "t".into(), "c".into(), vec![], Some(requested));
        assert_ne!(untagged.created_at, requested);
        assert!(untagged.created_at > requested);
    }

    #[tokio::test]
    async fn test_agent_drop_defaults() {
        let memory =
            Memory::from_agent_drop("u1".into(), None, "dropped".into(), Some("job-9".into()));

        assert_eq!(memory.status, MemoryStatus::Pending);
        assert!(memory.show_in_inbox);
        assert!(!memory.trusted);
        assert_eq!(memory.title, "AI Agent Drop");
        assert_eq!(memory.source_llm.as_deref(), Some("agent_drop"));
        assert_eq!(memory.job_id.as_deref(), Some("job-9"));
    }

    #[tokio::test]
    async fn test_get_owned_enforces_ownership() {
        let db = setup_test_db().await;
        let memory = Memory::new(
            "owner".into(),
            "t".into(),
            "c".into(),
            vec![],
            MemoryStatus::Approved,
            false,
            true,
            None,
        );
        db.store_item(memory.clone()).await.expect("store");

        let owned = Memory::get_owned(&memory.id, "owner", &db).await;
        assert!(owned.is_ok());

        let foreign = Memory::get_owned(&memory.id, "intruder", &db).await;
        assert!(matches!(foreign, Err(AppError::Auth(_))));

        let missing = Memory::get_owned("nope", "owner", &db).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_transition_and_inbox_listing() {
        let db = setup_test_db().await;
        let memory = Memory::new(
            "inbox_user".into(),
            "t".into(),
            "c".into(),
            vec![],
            MemoryStatus::Pending,
            true,
            false,
            Some("agent_drop".into()),
        );
        db.store_item(memory.clone()).await.expect("store");

        let inbox = Memory::inbox_items("inbox_user", &db).await.expect("inbox");
        assert_eq!(inbox.len(), 1);

        Memory::set_status(&memory.id, MemoryStatus::Approved, &db)
            .await
            .expect("set status");
        Memory::set_show_in_inbox(&memory.id, false, &db)
            .await
            .expect("hide");

        let inbox = Memory::inbox_items("inbox_user", &db).await.expect("inbox");
        assert!(inbox.is_empty());

        let updated: Option<Memory> = db.get_item(&memory.id).await.expect("get");
        assert_eq!(updated.unwrap().status, MemoryStatus::Approved);
    }

    #[tokio::test]
    async fn test_search_content_is_case_insensitive_and_recency_ordered() {
        let db = setup_test_db().await;
        let user_id = "searcher";

        let mut older = Memory::new(
            user_id.into(),
            "older".into(),
            "Visited the Louvre last spring".into(),
            vec![],
            MemoryStatus::Approved,
            false,
            true,
            None,
        );
        older.created_at = Utc::now() - chrono::Duration::days(10);

        let newer = Memory::new(
            user_id.into(),
            "newer".into(),
            "The louvre was crowded again".into(),
            vec![],
            MemoryStatus::Approved,
            false,
            true,
            None,
        );

        db.store_item(older.clone()).await.expect("store older");
        db.store_item(newer.clone()).await.expect("store newer");

        let hits = Memory::search_content(user_id, "LOUVRE", 5, &db)
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, newer.id);
        assert_eq!(hits[1].id, older.id);

        let none = Memory::search_content(user_id, "nonexistent", 5, &db)
            .await
            .expect("search");
        assert!(none.is_empty());
    }
}
