pub mod anthropic;
pub mod grazie_upstream;
pub mod openai;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::warn;

use crate::constants::{MESSAGE_CACHE_TTL_SECS, TOOLS_CACHE_TTL_SECS};
use crate::modules::cache::{messages_cache_key, tools_cache_key};
use crate::modules::stats::StatsGuard;
use crate::proxy::account_pool::AccountLease;
use crate::proxy::common::errors::{
    anthropic_error, openai_error, status_for, AnthropicErrorType,
};
use crate::proxy::mappers::anthropic::build_messages_response;
use crate::proxy::mappers::openai::{
    empty_usage, extract_text_content, ChatCompletionRequest, ChatMessage, Tool,
};
use crate::proxy::mappers::tool_schema::sanitize_tools;
use crate::proxy::server::AppState;
use crate::proxy::upstream::events::{parse_sse_line, LineBuffer};
use crate::proxy::upstream::payload::{build_payload, to_grazie_messages};
use self::grazie_upstream::{
    aggregate_stream, AnthropicSseWriter, AssemblerStep, OpenAiSseWriter, StreamAssembler,
    StreamOutcome,
};

/// Which wire dialect the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

fn dialect_error(dialect: Dialect, status: StatusCode, message: &str) -> Response {
    match dialect {
        Dialect::OpenAi => openai_error(status, message),
        Dialect::Anthropic => {
            anthropic_error(status, AnthropicErrorType::for_status(status), message)
        }
    }
}

/// The shared pipeline behind both chat endpoints: resolve → sanitize →
/// acquire → translate → dispatch → assemble.
pub(crate) async fn execute_chat(
    state: AppState,
    mut request: ChatCompletionRequest,
    dialect: Dialect,
) -> Response {
    let mut guard = StatsGuard::new(state.stats.clone(), &request.model, "");

    let Some(profile) = state.registry.resolve(&request.model).map(str::to_string) else {
        let message = format!("Model {} not found", request.model);
        return dialect_error(dialect, StatusCode::NOT_FOUND, &message);
    };

    // Tool sanitization, memoized by tool kinds and names.
    let sanitized_tools: Option<Vec<Tool>> = match &request.tools {
        Some(tools) if !tools.is_empty() => {
            let key = tools_cache_key(
                tools
                    .iter()
                    .map(|t| (t.kind.clone(), t.function.name.clone())),
            );
            let sanitized = match state.tools_cache.get(&key) {
                Some(cached) => cached,
                None => {
                    let sanitized = sanitize_tools(tools);
                    state.tools_cache.set(
                        &key,
                        sanitized.clone(),
                        Duration::from_secs(TOOLS_CACHE_TTL_SECS),
                    );
                    sanitized
                }
            };
            Some(sanitized)
        }
        _ => None,
    };

    // Tool-choice escalation: tools without an explicit choice become "any".
    if sanitized_tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
        && request.tool_choice.is_none()
    {
        request.tool_choice = Some(Value::String("any".to_string()));
    }

    if state.config.force_tool_prompt {
        if let Some(tools) = &sanitized_tools {
            augment_last_user_message(&mut request.messages, tools);
        }
    }

    let lease = match state.pool.acquire().await {
        Ok(lease) => lease,
        Err(e) => {
            return dialect_error(dialect, status_for(&e), &e.to_string());
        }
    };
    guard.set_account(&lease.display_name());

    // Message translation, memoized by the sequence's roles and text.
    let key = messages_cache_key(
        request
            .messages
            .iter()
            .map(|m| (m.role.clone(), extract_text_content(&m.content))),
    );
    let grazie_messages = match state.message_cache.get(&key) {
        Some(cached) => cached,
        None => {
            let translated = to_grazie_messages(&request.messages);
            state.message_cache.set(
                &key,
                translated.clone(),
                Duration::from_secs(MESSAGE_CACHE_TTL_SECS),
            );
            translated
        }
    };

    let payload = build_payload(&profile, grazie_messages, sanitized_tools.as_deref());

    let response = match grazie_upstream::dispatch(
        &state.http,
        &state.config.upstream_base,
        &state.pool,
        &lease,
        &payload,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!("Upstream request failed: {}", e);
            return dialect_error(
                dialect,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to reach upstream: {}", e),
            );
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        warn!("API Error: Status {}, Body: {}", status.as_u16(), body);
        return match dialect {
            Dialect::OpenAi => openai_error(status, &body),
            Dialect::Anthropic => {
                anthropic_error(status, AnthropicErrorType::for_status(status), &body)
            }
        };
    }

    match (dialect, request.stream) {
        (Dialect::OpenAi, true) => {
            stream_openai_response(response, request.model, lease, guard)
        }
        (Dialect::Anthropic, true) => {
            stream_anthropic_response(response, request.model, lease, guard)
        }
        (Dialect::OpenAi, false) => match aggregate_stream(response).await {
            Ok(outcome) => {
                guard.succeed();
                drop(lease);
                Json(build_completion_response(&request.model, &outcome)).into_response()
            }
            Err(e) => {
                warn!("Failed to read upstream stream: {}", e);
                dialect_error(
                    dialect,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Failed to read upstream response: {}", e),
                )
            }
        },
        (Dialect::Anthropic, false) => match aggregate_stream(response).await {
            Ok(outcome) => {
                guard.succeed();
                drop(lease);
                let message_id =
                    format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]);
                Json(build_messages_response(
                    &message_id,
                    &request.model,
                    &outcome.content,
                    &outcome.tool_calls,
                    &outcome.finish_reason,
                ))
                .into_response()
            }
            Err(e) => {
                warn!("Failed to read upstream stream: {}", e);
                dialect_error(
                    dialect,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Failed to read upstream response: {}", e),
                )
            }
        },
    }
}

/// Non-streaming OpenAI body from the drained assembler.
fn build_completion_response(model: &str, outcome: &StreamOutcome) -> Value {
    let mut message = json!({
        "role": "assistant",
        "content": outcome.content,
    });
    if !outcome.tool_calls.is_empty() {
        message["tool_calls"] = serde_json::to_value(&outcome.tool_calls).unwrap_or_default();
    }
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "message": message,
            "index": 0,
            "finish_reason": outcome.finish_reason
        }],
        "usage": empty_usage()
    })
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap()
}

/// Stream the upstream body as OpenAI chunks. The lease and stats guard move
/// into the stream so the account returns (and the outcome is recorded) when
/// the stream completes, errors out, or the client disconnects.
fn stream_openai_response(
    upstream: reqwest::Response,
    model: String,
    lease: AccountLease,
    guard: StatsGuard,
) -> Response {
    let sse = async_stream::stream! {
        let _lease = lease;
        let mut guard = guard;
        let mut writer = OpenAiSseWriter::new(&model);
        let mut assembler = StreamAssembler::new();
        let mut lines = LineBuffer::new();
        let mut byte_stream = upstream.bytes_stream();

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Upstream stream error: {}", e);
                    break 'read;
                }
            };
            for line in lines.push(&chunk) {
                match assembler.apply(parse_sse_line(&line)) {
                    AssemblerStep::Text(text) => {
                        yield Ok::<Bytes, std::io::Error>(Bytes::from(
                            writer.content_frame(&text),
                        ));
                    }
                    AssemblerStep::Finished(outcome) => {
                        yield Ok(Bytes::from(writer.finish_frames(&outcome)));
                        guard.succeed();
                        break 'read;
                    }
                    AssemblerStep::Pending => {}
                }
            }
        }
        // Ending here without FinishMetadata leaves the guard unfinished,
        // which records the failure.
    };
    sse_response(Body::from_stream(sse))
}

/// Stream the upstream body as Anthropic events.
fn stream_anthropic_response(
    upstream: reqwest::Response,
    model: String,
    lease: AccountLease,
    guard: StatsGuard,
) -> Response {
    let sse = async_stream::stream! {
        let _lease = lease;
        let mut guard = guard;
        let mut writer = AnthropicSseWriter::new(&model);
        let mut assembler = StreamAssembler::new();
        let mut lines = LineBuffer::new();
        let mut byte_stream = upstream.bytes_stream();

        yield Ok::<Bytes, std::io::Error>(Bytes::from(writer.open_frames()));

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Upstream stream error: {}", e);
                    break 'read;
                }
            };
            for line in lines.push(&chunk) {
                match assembler.apply(parse_sse_line(&line)) {
                    AssemblerStep::Text(text) => {
                        yield Ok(Bytes::from(writer.delta_frame(&text)));
                    }
                    AssemblerStep::Finished(_) => {
                        yield Ok(Bytes::from(writer.finish_frames()));
                        guard.succeed();
                        break 'read;
                    }
                    AssemblerStep::Pending => {}
                }
            }
        }
    };
    sse_response(Body::from_stream(sse))
}

/// Rewrite the last user message with a tool-usage preamble. Workaround for
/// upstream profiles that narrate instead of calling tools; enabled by the
/// `FORCE_TOOL_PROMPT` flag only.
fn augment_last_user_message(messages: &mut [ChatMessage], tools: &[Tool]) {
    if tools.is_empty() {
        return;
    }
    let Some(idx) = messages.iter().rposition(|m| m.role == "user") else {
        return;
    };

    let original = extract_text_content(&messages[idx].content);
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| {
            format!(
                "'{}'({})",
                t.function.name,
                t.function.description.as_deref().unwrap_or("")
            )
        })
        .collect();

    let enhanced = format!(
        "{}\n\nCRITICAL: TOOL-ONLY MODE.\n\
         Do not answer in prose. Call one of these functions immediately:\n{}\n\
         Extract parameter values from the request above; use sensible defaults for anything missing.",
        original,
        tool_lines.join("\n")
    );
    messages[idx].content = Some(Value::String(enhanced));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::openai::ToolFunction;
    use serde_json::json;

    fn user_message(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".into(),
            content: Some(json!(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn lookup_tool() -> Tool {
        Tool {
            kind: "function".into(),
            function: ToolFunction {
                name: "lookup".into(),
                description: Some("find things".into()),
                parameters: None,
            },
        }
    }

    #[test]
    fn test_augment_rewrites_last_user_message() {
        let mut messages = vec![
            user_message("first"),
            ChatMessage {
                role: "assistant".into(),
                content: Some(json!("ok")),
                tool_calls: None,
                tool_call_id: None,
            },
            user_message("do the thing"),
        ];
        augment_last_user_message(&mut messages, &[lookup_tool()]);

        let text = extract_text_content(&messages[2].content);
        assert!(text.starts_with("do the thing"));
        assert!(text.contains("TOOL-ONLY MODE"));
        assert!(text.contains("'lookup'(find things)"));
        // Earlier messages untouched.
        assert_eq!(extract_text_content(&messages[0].content), "first");
    }

    #[test]
    fn test_augment_no_user_message_is_noop() {
        let mut messages = vec![ChatMessage {
            role: "system".into(),
            content: Some(json!("rules")),
            tool_calls: None,
            tool_call_id: None,
        }];
        let before = serde_json::to_string(&messages).unwrap();
        augment_last_user_message(&mut messages, &[lookup_tool()]);
        assert_eq!(serde_json::to_string(&messages).unwrap(), before);
    }

    #[test]
    fn test_build_completion_response_with_tools() {
        let outcome = StreamOutcome {
            content: "".into(),
            tool_calls: vec![crate::proxy::mappers::openai::ToolCall {
                id: "call_1".into(),
                kind: "function".into(),
                function: crate::proxy::mappers::openai::FunctionCall {
                    name: "lookup".into(),
                    arguments: "{}".into(),
                },
            }],
            finish_reason: "tool_calls".into(),
        };
        let body = build_completion_response("gpt-4o", &outcome);
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(
            body["choices"][0]["message"]["tool_calls"][0]["function"]["name"],
            "lookup"
        );
        assert_eq!(body["usage"]["total_tokens"], 0);
    }

    #[test]
    fn test_build_completion_response_text_only() {
        let outcome = StreamOutcome {
            content: "hello".into(),
            tool_calls: vec![],
            finish_reason: "stop".into(),
        };
        let body = build_completion_response("gpt-4o", &outcome);
        assert_eq!(body["choices"][0]["message"]["content"], "hello");
        assert!(body["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }
}
