use std::sync::Arc;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{usage_event::UsageEvent, user::User},
    },
};

/// The UsageSink: records every LLM call's token consumption and enforces the
/// per-user 24-hour budget before a call is dispatched.
#[derive(Clone)]
pub struct UsageTracker {
    db: Arc<SurrealDbClient>,
    max_daily_tokens: i64,
}

impl UsageTracker {
    pub fn new(db: Arc<SurrealDbClient>, max_daily_tokens: i64) -> Self {
        Self {
            db,
            max_daily_tokens,
        }
    }

    pub async fn record(
        &self,
        user_id: &str,
        provider: &str,
        model_name: Option<String>,
        tokens_in: i64,
        tokens_out: i64,
    ) -> Result<(), AppError> {
        let event = UsageEvent::new(
            user_id.to_string(),
            provider.to_string(),
            model_name,
            tokens_in,
            tokens_out,
        );
        self.db.store_item(event).await?;
        Ok(())
    }

    /// Fails with `BudgetExceeded` once the trailing 24-hour token total has
    /// passed the user's budget (their own setting, or the system default).
    /// The call that crosses the line is the last one allowed through.
    pub async fn check_budget(&self, user_id: &str) -> Result<(), AppError> {
        let budget = self.budget_for(user_id).await?;
        let spent = UsageEvent::tokens_last_24h(user_id, &self.db).await?;

        if spent > budget {
            tracing::warn!(user_id, spent, budget, "daily token budget exceeded");
            return Err(AppError::BudgetExceeded(user_id.to_string()));
        }

        Ok(())
    }

    async fn budget_for(&self, user_id: &str) -> Result<i64, AppError> {
        let user: Option<User> = self.db.get_item(user_id).await?;
        Ok(user
            .and_then(|u| u.settings.daily_token_budget)
            .unwrap_or(self.max_daily_tokens))
    }
}
