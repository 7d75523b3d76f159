use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    pub secret_key: String,
    #[serde(default = "default_access_token_expire_minutes")]
    pub access_token_expire_minutes: u32,
    #[serde(default = "default_refresh_token_expire_days")]
    pub refresh_token_expire_days: u32,

    // Primary LLM provider plus an optional fallback, both OpenAI-compatible.
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default)]
    pub fallback_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub fallback_base_url: String,
    #[serde(default = "default_chat_model")]
    pub fallback_chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    #[serde(default = "default_max_daily_tokens")]
    pub max_daily_tokens: i64,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,
}

fn default_access_token_expire_minutes() -> u32 {
    30
}

fn default_refresh_token_expire_days() -> u32 {
    30
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_max_daily_tokens() -> i64 {
    100_000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_concurrency() -> usize {
    10
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in_optional_fields() {
        let config = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .unwrap()
            .set_override("surrealdb_username", "root")
            .unwrap()
            .set_override("surrealdb_password", "root")
            .unwrap()
            .set_override("surrealdb_namespace", "ns")
            .unwrap()
            .set_override("surrealdb_database", "db")
            .unwrap()
            .set_override("http_port", 3000)
            .unwrap()
            .set_override("secret_key", "secret")
            .unwrap()
            .build()
            .unwrap();

        let app_config: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app_config.max_daily_tokens, 100_000);
        assert_eq!(app_config.embedding_dimensions, 1536);
        assert_eq!(app_config.llm_concurrency, 10);
        assert_eq!(app_config.chat_model, "gpt-4o-mini");
        assert!(app_config.fallback_api_key.is_none());
    }
}
