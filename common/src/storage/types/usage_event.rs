use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Approximate cost per million tokens (input, output) by provider.
const COST_RATES: [(&str, f64, f64); 3] = [
    ("openai", 0.50, 1.50),
    ("fallback", 0.50, 1.50),
    ("gemini", 0.10, 0.30),
];

stored_object!(UsageEvent, "usage_event", {
    user_id: String,
    provider: String,
    model_name: Option<String>,
    tokens_in: i64,
    tokens_out: i64,
    estimated_cost: f64
});

impl UsageEvent {
    pub fn new(
        user_id: String,
        provider: String,
        model_name: Option<String>,
        tokens_in: i64,
        tokens_out: i64,
    ) -> Self {
        let now = Utc::now();
        let estimated_cost = estimate_cost(&provider, tokens_in, tokens_out);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            provider,
            model_name,
            tokens_in,
            tokens_out,
            estimated_cost,
        }
    }

    /// Sum of tokens charged to the user within the trailing 24 hours.
    pub async fn tokens_last_24h(user_id: &str, db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct TotalRow {
            #[serde(default)]
            total: Option<i64>,
        }

        let since = Utc::now() - chrono::Duration::days(1);
        let row: Option<TotalRow> = db
            .client
            .query(
                "SELECT math::sum(tokens_in) + math::sum(tokens_out) AS total
                 FROM type::table($table)
                 WHERE user_id = $user_id AND created_at >= $since
                 GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("since", surrealdb::sql::Datetime::from(since)))
            .await?
            .take(0)?;

        Ok(row.and_then(|r| r.total).unwrap_or(0))
    }
}

fn estimate_cost(provider: &str, tokens_in: i64, tokens_out: i64) -> f64 {
    let (rate_in, rate_out) = COST_RATES
        .iter()
        .find(|(name, _, _)| *name == provider)
        .map_or((0.0, 0.0), |(_, r_in, r_out)| (*r_in, *r_out));

    (tokens_in as f64 / 1_000_000.0) * rate_in + (tokens_out as f64 / 1_000_000.0) * rate_out
}
