use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Pending,
    Accepted,
    Rejected,
}

stored_object!(MemoryCluster, "cluster", {
    user_id: String,
    member_memory_ids: Vec<String>,
    representative_text: String,
    status: ClusterStatus
});

impl MemoryCluster {
    pub fn new(user_id: String, member_memory_ids: Vec<String>, representative_text: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            member_memory_ids,
            representative_text,
            status: ClusterStatus::Pending,
        }
    }

    pub async fn pending_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let clusters: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id AND status = 'pending' ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?
            .take(0)?;

        Ok(clusters)
    }

    pub async fn resolve(
        id: &str,
        status: ClusterStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = $status, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .await?;

        Ok(())
    }
}
