use std::{sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient, utils::config::AppConfig};

use super::{
    parse_valid_from,
    prompts::{
        chat_user_message, enrichment_schema, fact_extraction_schema,
        fact_extraction_user_message, tag_suggestion_schema, CHAT_SYSTEM_MESSAGE,
        ENRICHMENT_SYSTEM_MESSAGE, FACT_EXTRACTION_SYSTEM_MESSAGE, TAG_SUGGESTION_SYSTEM_MESSAGE,
    },
    usage::UsageTracker,
    ChunkEnrichment, FactCandidate,
};

/// A named JSON schema the model output must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Requested provider by name; the gateway falls back in declared order
    /// when the named provider has no credential.
    pub provider: Option<String>,
    pub response_schema: Option<ResponseSchema>,
    pub temperature: Option<f32>,
}

/// Uniform interface over the chat providers. `generate` is the only
/// provider-specific operation; the structured operations are built on it and
/// shared by every implementation, so test doubles can override either level.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(
        &self,
        user_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        opts: GenerateOptions,
    ) -> Result<String, AppError>;

    async fn enrich(&self, user_id: &str, chunk_text: &str) -> Result<ChunkEnrichment, AppError> {
        let opts = GenerateOptions {
            response_schema: Some(ResponseSchema {
                name: "chunk_enrichment".to_string(),
                schema: enrichment_schema(),
            }),
            ..GenerateOptions::default()
        };
        let raw = self
            .generate(user_id, ENRICHMENT_SYSTEM_MESSAGE, chunk_text, opts)
            .await?;

        parse_json_response::<ChunkEnrichment>(&raw)
    }

    async fn extract_facts(
        &self,
        user_id: &str,
        chunk_text: &str,
        reference_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<FactCandidate>, AppError> {
        #[derive(Deserialize)]
        struct WireFact {
            subject: String,
            predicate: String,
            object: String,
            #[serde(default)]
            confidence: Option<f32>,
            #[serde(default)]
            valid_from: Option<String>,
            #[serde(default)]
            location: Option<String>,
        }

        #[derive(Deserialize)]
        struct WireFacts {
            facts: Vec<WireFact>,
        }

        let opts = GenerateOptions {
            response_schema: Some(ResponseSchema {
                name: "fact_extraction".to_string(),
                schema: fact_extraction_schema(),
            }),
            ..GenerateOptions::default()
        };
        let raw = self
            .generate(
                user_id,
                FACT_EXTRACTION_SYSTEM_MESSAGE,
                &fact_extraction_user_message(chunk_text, reference_date),
                opts,
            )
            .await?;

        let wire = parse_json_response::<WireFacts>(&raw)?;
        Ok(wire
            .facts
            .into_iter()
            .map(|f| FactCandidate {
                subject: f.subject,
                predicate: f.predicate,
                object: f.object,
                confidence: f.confidence.unwrap_or(1.0),
                valid_from: f.valid_from.as_deref().and_then(parse_valid_from),
                location: f.location,
            })
            .collect())
    }

    async fn suggest_tags(
        &self,
        user_id: &str,
        content: &str,
        existing_tags: &[String],
    ) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct WireTags {
            tags: Vec<String>,
        }

        let opts = GenerateOptions {
            response_schema: Some(ResponseSchema {
                name: "tag_suggestion".to_string(),
                schema: tag_suggestion_schema(),
            }),
            ..GenerateOptions::default()
        };
        let prompt = format!("Existing tags: {existing_tags:?}\n\nNote:\n{content}");
        let raw = self
            .generate(user_id, TAG_SUGGESTION_SYSTEM_MESSAGE, &prompt, opts)
            .await?;

        let wire = parse_json_response::<WireTags>(&raw)?;
        Ok(wire
            .tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .take(5)
            .collect())
    }

    /// Grounded answering over already-retrieved context.
    async fn answer(
        &self,
        user_id: &str,
        query: &str,
        context: &[String],
    ) -> Result<String, AppError> {
        if context.is_empty() {
            return Ok("I couldn't find any relevant information in your knowledge base to \
                       answer that. Try adding more memories related to your question."
                .to_string());
        }

        self.generate(
            user_id,
            CHAT_SYSTEM_MESSAGE,
            &chat_user_message(query, context),
            GenerateOptions::default(),
        )
        .await
    }
}

struct Provider {
    name: String,
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

/// Production gateway over one or more OpenAI-compatible endpoints.
pub struct OpenAiGateway {
    providers: Vec<Provider>,
    usage: UsageTracker,
    timeout: Duration,
}

impl OpenAiGateway {
    pub fn from_config(config: &AppConfig, db: Arc<SurrealDbClient>) -> Self {
        let mut providers = Vec::new();

        if !config.openai_api_key.is_empty() {
            providers.push(Provider {
                name: "openai".to_string(),
                client: async_openai::Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(&config.openai_api_key)
                        .with_api_base(&config.openai_base_url),
                ),
                model: config.chat_model.clone(),
            });
        }

        if let Some(fallback_key) = config.fallback_api_key.as_deref() {
            providers.push(Provider {
                name: "fallback".to_string(),
                client: async_openai::Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(fallback_key)
                        .with_api_base(&config.fallback_base_url),
                ),
                model: config.fallback_chat_model.clone(),
            });
        }

        Self {
            providers,
            usage: UsageTracker::new(db, config.max_daily_tokens),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// The requested provider first when it holds a credential, then the rest
    /// in declared order.
    fn eligible_providers(&self, requested: Option<&str>) -> Vec<&Provider> {
        let mut ordered: Vec<&Provider> = Vec::with_capacity(self.providers.len());

        if let Some(name) = requested {
            if let Some(preferred) = self.providers.iter().find(|p| p.name == name) {
                ordered.push(preferred);
            } else {
                warn!(provider = name, "requested provider unavailable; falling back");
            }
        }

        for provider in &self.providers {
            if !ordered.iter().any(|p| p.name == provider.name) {
                ordered.push(provider);
            }
        }

        ordered
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn generate(
        &self,
        user_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        opts: GenerateOptions,
    ) -> Result<String, AppError> {
        // The gate closes before any provider is contacted.
        self.usage.check_budget(user_id).await?;

        let ordered = self.eligible_providers(opts.provider.as_deref());
        if ordered.is_empty() {
            return Err(AppError::NoProvider);
        }

        let mut last_error: Option<AppError> = None;

        for provider in ordered {
            let mut builder = CreateChatCompletionRequestArgs::default();
            builder.model(&provider.model).messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_prompt).into(),
            ]);
            if let Some(temperature) = opts.temperature {
                builder.temperature(temperature);
            }
            if let Some(schema) = &opts.response_schema {
                builder.response_format(ResponseFormat::JsonSchema {
                    json_schema: ResponseFormatJsonSchema {
                        description: None,
                        name: schema.name.clone(),
                        schema: Some(schema.schema.clone()),
                        strict: Some(true),
                    },
                });
            }
            let request = builder.build()?;

            let outcome =
                tokio::time::timeout(self.timeout, provider.client.chat().create(request)).await;

            match outcome {
                Err(_) => {
                    warn!(provider = %provider.name, "chat completion timed out");
                    last_error = Some(AppError::UpstreamTimeout(format!(
                        "chat completion via {}",
                        provider.name
                    )));
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider.name, error = %e, "chat completion failed");
                    last_error = Some(AppError::OpenAI(e));
                }
                Ok(Ok(response)) => {
                    if let Some(usage) = &response.usage {
                        self.usage
                            .record(
                                user_id,
                                &provider.name,
                                Some(provider.model.clone()),
                                i64::from(usage.prompt_tokens),
                                i64::from(usage.completion_tokens),
                            )
                            .await?;
                    }

                    let content = response
                        .choices
                        .first()
                        .and_then(|choice| choice.message.content.clone())
                        .ok_or(AppError::LLMParsing(
                            "No content found in LLM response".into(),
                        ))?;

                    debug!(provider = %provider.name, chars = content.len(), "chat completion ok");
                    return Ok(content);
                }
            }
        }

        Err(last_error.unwrap_or(AppError::NoProvider))
    }
}

/// Pulls the JSON object out of a model response, tolerating code fences and
/// leading prose, and deserializes it.
pub fn parse_json_response<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, AppError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let trimmed = cleaned.trim();

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end >= start => trimmed.get(start..=end).unwrap_or(trimmed),
        _ => trimmed,
    };

    serde_json::from_str(candidate)
        .map_err(|e| AppError::LLMParsing(format!("Failed to parse LLM response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct ScriptedGateway {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn with_responses(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn generate(
            &self,
            _user_id: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _opts: GenerateOptions,
        ) -> Result<String, AppError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AppError::InternalError("no scripted response left".into()))
        }
    }

    #[test]
    fn test_parse_json_response_handles_fences_and_prose() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Out {
            value: i32,
        }

        let fenced = "```json\n{\"value\": 3}\n```";
        assert_eq!(parse_json_response::<Out>(fenced).unwrap(), Out { value: 3 });

        let prosey = "Here you go: {\"value\": 7} hope that helps";
        assert_eq!(parse_json_response::<Out>(prosey).unwrap(), Out { value: 7 });

        assert!(parse_json_response::<Out>("not json at all").is_err());
    }

    #[tokio::test]
    async fn test_enrich_parses_structured_output() {
        let gateway = ScriptedGateway::with_responses(vec![
            r#"{"summary": "A note about Tokyo.", "generated_qas": [{"question": "Where?", "answer": "Tokyo"}], "entities": ["Tokyo"]}"#,
        ]);

        let enrichment = gateway.enrich("u", "I moved to Tokyo.").await.unwrap();
        assert_eq!(enrichment.summary, "A note about Tokyo.");
        assert_eq!(enrichment.generated_qas.len(), 1);
        assert_eq!(enrichment.entities, vec!["Tokyo".to_string()]);
    }

    #[tokio::test]
    async fn test_extract_facts_resolves_dates_and_defaults() {
        let gateway = ScriptedGateway::with_responses(vec![
            r#"{"facts": [
                {"subject": "User", "predicate": "lives_in", "object": "Tokyo", "confidence": 0.9, "valid_from": "2023-01-15", "location": null},
                {"subject": "User", "predicate": "likes", "object": "ramen", "confidence": null, "valid_from": null, "location": "Tokyo"}
            ]}"#,
        ]);

        let facts = gateway.extract_facts("u", "text", None).await.unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].valid_from.unwrap().format("%Y-%m-%d").to_string(), "2023-01-15");
        assert!((facts[1].confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(facts[1].location.as_deref(), Some("Tokyo"));
    }

    #[tokio::test]
    async fn test_suggest_tags_normalizes_and_caps() {
        let gateway = ScriptedGateway::with_responses(vec![
            r#"{"tags": [" Travel ", "JAPAN", "food", "", "notes", "extra", "overflow"]}"#,
        ]);

        let tags = gateway.suggest_tags("u", "note", &[]).await.unwrap();
        assert_eq!(tags, vec!["travel", "japan", "food", "notes", "extra"]);
    }

    #[tokio::test]
    async fn test_answer_short_circuits_without_context() {
        let gateway = ScriptedGateway::default();
        let answer = gateway.answer("u", "where do I live", &[]).await.unwrap();
        assert!(answer.contains("couldn't find"));
    }

    #[tokio::test]
    async fn test_gateway_without_credentials_returns_no_provider() {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory(namespace, &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized(3).await.expect("init");

        let config = AppConfig {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "ns".into(),
            surrealdb_database: "db".into(),
            http_port: 0,
            secret_key: "secret".into(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 30,
            openai_api_key: String::new(),
            openai_base_url: "https://example.invalid/v1".into(),
            chat_model: "gpt-4o-mini".into(),
            fallback_api_key: None,
            fallback_base_url: "https://example.invalid/v1".into(),
            fallback_chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 3,
            max_daily_tokens: 100,
            llm_timeout_secs: 1,
            llm_concurrency: 2,
        };

        let gateway = OpenAiGateway::from_config(&config, db);
        let result = gateway
            .generate("u", "system", "user", GenerateOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::NoProvider)));
    }
}
