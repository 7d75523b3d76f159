use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("No LLM provider available")]
    NoProvider,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) | AppError::InputRejected(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Forbidden(msg),
            AppError::BudgetExceeded(_) => {
                Self::TooManyRequests("Daily LLM budget exceeded".to_string())
            }
            AppError::RateLimited => {
                Self::TooManyRequests("Too many requests. Try again later.".to_string())
            }
            AppError::NoProvider => Self::NoProvider,
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            Self::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message),
            Self::TooManyRequests(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            Self::NoProvider => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No LLM provider available".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_app_error_conversions() {
        let budget = ApiError::from(AppError::BudgetExceeded("u".into()));
        assert!(matches!(budget, ApiError::TooManyRequests(_)));

        let rate = ApiError::from(AppError::RateLimited);
        assert!(matches!(rate, ApiError::TooManyRequests(_)));

        let rejected = ApiError::from(AppError::InputRejected("too big".into()));
        assert!(matches!(rejected, ApiError::ValidationError(_)));

        let missing = ApiError::from(AppError::NotFound("memory".into()));
        assert!(matches!(missing, ApiError::NotFound(_)));

        let forbidden = ApiError::from(AppError::Auth("not yours".into()));
        assert!(matches!(forbidden, ApiError::Forbidden(_)));

        let provider = ApiError::from(AppError::NoProvider);
        assert!(matches!(provider, ApiError::NoProvider));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(ApiError::InternalError("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::ValidationError("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ApiError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApiError::PayloadTooLarge("x".into())),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_of(ApiError::TooManyRequests("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_of(ApiError::NoProvider), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
    }
}
