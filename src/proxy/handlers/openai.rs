//! OpenAI-dialect endpoints: `GET /v1/models`, `POST /v1/chat/completions`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use super::{execute_chat, Dialect};
use crate::proxy::common::errors::openai_error;
use crate::proxy::mappers::openai::ChatCompletionRequest;
use crate::proxy::server::AppState;

pub async fn list_models(State(state): State<AppState>) -> Response {
    Json(json!({
        "object": "list",
        "data": state.registry.listed(),
    }))
    .into_response()
}

pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            state.stats.record(false, 0, "", "");
            return openai_error(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };
    execute_chat(state, request, Dialect::OpenAi).await
}
