use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Input rejected: {0}")]
    InputRejected(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Daily token budget exceeded for user {0}")]
    BudgetExceeded(String),
    #[error("No usable credential for any eligible LLM provider")]
    NoProvider,
    #[error("Upstream call timed out: {0}")]
    UpstreamTimeout(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Task-level errors are retried unless the input itself is at fault.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_)
                | Self::InputRejected(_)
                | Self::Auth(_)
                | Self::NotFound(_)
                | Self::InvariantViolation(_)
        )
    }
}
