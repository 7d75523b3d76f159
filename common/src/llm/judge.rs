use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{error::AppError, storage::types::fact::Fact};

use super::{
    gateway::{parse_json_response, GenerateOptions, LlmGateway, ResponseSchema},
    prompts::{fact_judge_schema, fact_judge_user_message, FACT_JUDGE_SYSTEM_MESSAGE},
    FactCandidate,
};

/// An existing fact presented to the judge, addressed by its vector-store id.
#[derive(Debug, Clone)]
pub struct JudgeCandidate {
    pub vector_id: String,
    pub text: String,
    pub valid_from: Option<DateTime<Utc>>,
}

impl JudgeCandidate {
    fn render(&self) -> String {
        let date = self.valid_from.map_or_else(
            || "Unknown".to_string(),
            |d| d.format("%Y-%m-%d").to_string(),
        );
        format!("[{}] Date: {date} | Text: {}", self.vector_id, self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeDecision {
    New,
    Duplicate,
    Supersede,
}

/// The judge's verdict; `target_id` is the relational fact id, normalized
/// from the `fact_<k>` form the judge sees.
#[derive(Debug, Clone)]
pub struct FactJudgment {
    pub decision: JudgeDecision,
    pub target_id: Option<String>,
}

impl FactJudgment {
    pub fn new() -> Self {
        Self {
            decision: JudgeDecision::New,
            target_id: None,
        }
    }
}

impl Default for FactJudgment {
    fn default() -> Self {
        Self::new()
    }
}

/// Pluggable policy deciding whether an extracted fact is new, a duplicate,
/// or supersedes an existing one.
#[async_trait]
pub trait FactJudge: Send + Sync {
    async fn judge(
        &self,
        user_id: &str,
        candidate: &FactCandidate,
        existing: &[JudgeCandidate],
    ) -> Result<FactJudgment, AppError>;
}

/// Identity policy: everything is new. The deterministic single-value guard
/// still keeps the current-fact invariant, which makes this the test default.
pub struct AlwaysNew;

#[async_trait]
impl FactJudge for AlwaysNew {
    async fn judge(
        &self,
        _user_id: &str,
        _candidate: &FactCandidate,
        _existing: &[JudgeCandidate],
    ) -> Result<FactJudgment, AppError> {
        Ok(FactJudgment::new())
    }
}

/// Production judge backed by the LLM gateway.
pub struct LlmJudge {
    gateway: Arc<dyn LlmGateway>,
}

impl LlmJudge {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl FactJudge for LlmJudge {
    async fn judge(
        &self,
        user_id: &str,
        candidate: &FactCandidate,
        existing: &[JudgeCandidate],
    ) -> Result<FactJudgment, AppError> {
        #[derive(Deserialize)]
        struct WireJudgment {
            decision: String,
            #[serde(default)]
            target_id: Option<String>,
        }

        if existing.is_empty() {
            return Ok(FactJudgment::new());
        }

        let lines: Vec<String> = existing.iter().map(JudgeCandidate::render).collect();
        let opts = GenerateOptions {
            response_schema: Some(ResponseSchema {
                name: "fact_judgment".to_string(),
                schema: fact_judge_schema(),
            }),
            temperature: Some(0.0),
            ..GenerateOptions::default()
        };

        let raw = self
            .gateway
            .generate(
                user_id,
                FACT_JUDGE_SYSTEM_MESSAGE,
                &fact_judge_user_message(
                    &candidate.triple_text(),
                    candidate.valid_from,
                    &lines,
                ),
                opts,
            )
            .await?;

        let wire = parse_json_response::<WireJudgment>(&raw)?;
        let decision = match wire.decision.to_ascii_uppercase().as_str() {
            "DUPLICATE" => JudgeDecision::Duplicate,
            "SUPERSEDE" => JudgeDecision::Supersede,
            _ => JudgeDecision::New,
        };

        let target_id = wire
            .target_id
            .as_deref()
            .and_then(Fact::parse_vector_id)
            .filter(|_| decision == JudgeDecision::Supersede);

        Ok(FactJudgment {
            decision,
            target_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedGateway {
        response: Mutex<String>,
    }

    #[async_trait]
    impl LlmGateway for CannedGateway {
        async fn generate(
            &self,
            _user_id: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _opts: GenerateOptions,
        ) -> Result<String, AppError> {
            Ok(self.response.lock().unwrap().clone())
        }
    }

    fn candidate() -> FactCandidate {
        FactCandidate {
            subject: "User".into(),
            predicate: "lives_in".into(),
            object: "Tokyo".into(),
            confidence: 1.0,
            valid_from: None,
            location: None,
        }
    }

    fn existing() -> Vec<JudgeCandidate> {
        vec![JudgeCandidate {
            vector_id: "fact_abc".into(),
            text: "User lives_in Berlin".into(),
            valid_from: None,
        }]
    }

    #[tokio::test]
    async fn test_always_new_never_supersedes() {
        let judgment = AlwaysNew
            .judge("u", &candidate(), &existing())
            .await
            .unwrap();
        assert_eq!(judgment.decision, JudgeDecision::New);
        assert!(judgment.target_id.is_none());
    }

    #[tokio::test]
    async fn test_llm_judge_short_circuits_without_candidates() {
        let gateway = Arc::new(CannedGateway {
            response: Mutex::new("should not be called".into()),
        });
        let judge = LlmJudge::new(gateway);

        let judgment = judge.judge("u", &candidate(), &[]).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::New);
    }

    #[tokio::test]
    async fn test_llm_judge_normalizes_target_ids() {
        let gateway = Arc::new(CannedGateway {
            response: Mutex::new(
                r#"{"decision": "SUPERSEDE", "target_id": "fact_abc"}"#.to_string(),
            ),
        });
        let judge = LlmJudge::new(gateway);

        let judgment = judge.judge("u", &candidate(), &existing()).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::Supersede);
        assert_eq!(judgment.target_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_llm_judge_drops_target_for_non_supersede() {
        let gateway = Arc::new(CannedGateway {
            response: Mutex::new(
                r#"{"decision": "DUPLICATE", "target_id": "fact_abc"}"#.to_string(),
            ),
        });
        let judge = LlmJudge::new(gateway);

        let judgment = judge.judge("u", &candidate(), &existing()).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::Duplicate);
        assert!(judgment.target_id.is_none());
    }

    #[tokio::test]
    async fn test_llm_judge_defaults_to_new_on_unknown_decision() {
        let gateway = Arc::new(CannedGateway {
            response: Mutex::new(r#"{"decision": "MAYBE", "target_id": null}"#.to_string()),
        });
        let judge = LlmJudge::new(gateway);

        let judgment = judge.judge("u", &candidate(), &existing()).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::New);
    }
}
