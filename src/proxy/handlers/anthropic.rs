//! Anthropic-dialect endpoint: `POST /v1/messages`.
//!
//! Requests are rewritten to the canonical chat shape up front, so the rest
//! of the pipeline is dialect-blind; only the response framing differs.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Json, Response};

use super::{execute_chat, Dialect};
use crate::proxy::common::errors::{anthropic_error, AnthropicErrorType};
use crate::proxy::mappers::anthropic::{to_chat_request, AnthropicMessagesRequest};
use crate::proxy::server::AppState;

pub async fn messages(
    State(state): State<AppState>,
    payload: Result<Json<AnthropicMessagesRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            state.stats.record(false, 0, "", "");
            return anthropic_error(
                StatusCode::BAD_REQUEST,
                AnthropicErrorType::InvalidRequestError,
                &rejection.body_text(),
            );
        }
    };

    let mut chat = to_chat_request(&request);
    // The alias table maps Anthropic-dialect model names onto advertised ids.
    chat.model = state
        .registry
        .resolve_anthropic_alias(&chat.model)
        .to_string();

    execute_chat(state, chat, Dialect::Anthropic).await
}
