use chrono_tz::Tz;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Typed per-user settings. Earlier revisions carried these as a free-form
/// mapping; unknown keys are now rejected at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserSettings {
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
    #[serde(default)]
    pub daily_token_budget: Option<i64>,
}

fn default_auto_approve() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            auto_approve: true,
            daily_token_budget: None,
        }
    }
}

impl UserSettings {
    /// Parses a settings payload, rejecting unrecognized options.
    pub fn from_value(value: serde_json::Value) -> Result<Self, AppError> {
        serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("invalid user settings: {e}")))
    }
}

stored_object!(User, "user", {
    email: String,
    active: bool,
    api_key: Option<String>,
    drop_token: String,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    settings: UserSettings
});

fn validate_timezone(input: &str) -> String {
    match input.parse::<Tz>() {
        Ok(_) => input.to_owned(),
        Err(_) => {
            tracing::warn!("Invalid timezone '{}' received, defaulting to UTC", input);
            "UTC".to_owned()
        }
    }
}

impl User {
    pub fn new(email: String, timezone: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email,
            active: true,
            api_key: None,
            drop_token: generate_drop_token(),
            timezone: validate_timezone(&timezone),
            settings: UserSettings::default(),
        }
    }

    pub async fn create_new(
        email: String,
        timezone: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let user = Self::new(email, timezone);
        let stored = db.store_item(user).await?;
        stored.ok_or_else(|| AppError::InternalError("User failed to create".into()))
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE api_key = $api_key AND active = true LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn find_by_drop_token(
        drop_token: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE drop_token = $drop_token AND active = true LIMIT 1")
            .bind(("drop_token", drop_token.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn set_api_key(id: &str, db: &SurrealDbClient) -> Result<String, AppError> {
        let api_key = format!("sk_{}", Uuid::new_v4().to_string().replace("-", ""));

        let user: Option<User> = db
            .client
            .query(
                "UPDATE type::thing('user', $id)
                SET api_key = $api_key
                RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .bind(("api_key", api_key.clone()))
            .await?
            .take(0)?;

        if user.is_some() {
            Ok(api_key)
        } else {
            Err(AppError::Auth("User not found".into()))
        }
    }

    pub async fn rotate_drop_token(id: &str, db: &SurrealDbClient) -> Result<String, AppError> {
        let drop_token = generate_drop_token();

        let user: Option<User> = db
            .client
            .query(
                "UPDATE type::thing('user', $id)
                SET drop_token = $drop_token
                RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .bind(("drop_token", drop_token.clone()))
            .await?
            .take(0)?;

        if user.is_some() {
            Ok(drop_token)
        } else {
            Err(AppError::Auth("User not found".into()))
        }
    }

    /// Soft deactivation only; the row is never removed.
    pub async fn deactivate(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('user', $id) SET active = false")
            .bind(("id", id.to_owned()))
            .await?;
        Ok(())
    }

    pub async fn update_settings(
        id: &str,
        settings: UserSettings,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('user', $id) SET settings = $settings")
            .bind(("id", id.to_owned()))
            .bind(("settings", settings))
            .await?;
        Ok(())
    }

    /// The timezone used to render fact dates, falling back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(Tz::UTC)
    }
}

fn generate_drop_token() -> String {
    format!("drop_{}", Uuid::new_v4().to_string().replace("-", ""))
}
