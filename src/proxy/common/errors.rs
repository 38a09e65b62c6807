// Error response formatting for both client dialects.
// OpenAI surface: {"error": "<msg>"}. Anthropic surface:
// {"type": "error", "error": {"type": "<type>", "message": "<msg>"}}.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicErrorType {
    InvalidRequestError,
    AuthenticationError,
    RateLimitError,
    ApiError,
}

impl AnthropicErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::AuthenticationError => "authentication_error",
            Self::RateLimitError => "rate_limit_error",
            Self::ApiError => "api_error",
        }
    }

    pub fn for_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 | 404 | 413 | 422 => Self::InvalidRequestError,
            401 | 403 => Self::AuthenticationError,
            429 => Self::RateLimitError,
            _ => Self::ApiError,
        }
    }
}

pub fn openai_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub fn anthropic_error(
    status: StatusCode,
    error_type: AnthropicErrorType,
    message: &str,
) -> Response {
    let body = json!({
        "type": "error",
        "error": {
            "type": error_type.as_str(),
            "message": message
        }
    });
    (status, Json(body)).into_response()
}

/// Map a broker/orchestrator failure onto the HTTP surface. Credential
/// exhaustion of any flavor lands on 429 with a readable reason.
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::NoAccounts => StatusCode::SERVICE_UNAVAILABLE,
        AppError::AcquireTimeout | AppError::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
        AppError::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
