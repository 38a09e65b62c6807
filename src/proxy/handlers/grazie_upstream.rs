// Grazie upstream handler.
// Dispatches the translated payload to the chat stream endpoint, classifies
// the status (401 refresh-retry, 477 out-of-quota), and drives the stream
// state machine that re-emits upstream events as OpenAI chunks, Anthropic
// events, or one aggregated response.

use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::constants::{
    CHAT_STREAM_PATH, GRAZIE_AGENT_DESCRIPTOR, GRAZIE_JWT_HEADER, GRAZIE_USER_AGENT,
};
use crate::error::AppResult;
use crate::proxy::account_pool::{AccountLease, AccountPool};
use crate::proxy::mappers::openai::{FunctionCall, ToolCall};
use crate::proxy::upstream::events::{parse_sse_line, LineBuffer, StreamOp};
use crate::proxy::upstream::payload::GraziePayload;

// ─── Dispatch ───────────────────────────────────────────────────────────────

async fn send_chat_request(
    client: &reqwest::Client,
    base_url: &str,
    jwt: &str,
    payload: &GraziePayload,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .post(format!("{}{}", base_url, CHAT_STREAM_PATH))
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::USER_AGENT, GRAZIE_USER_AGENT)
        .header("Accept-Charset", "UTF-8")
        .header("grazie-agent", GRAZIE_AGENT_DESCRIPTOR)
        .header(GRAZIE_JWT_HEADER, jwt)
        .json(payload)
        .send()
        .await
}

/// POST the payload with the lease's token. A 401 triggers one forced
/// refresh and one retry; a 477 flips the account to out-of-quota. The
/// response is returned as-is for the caller to classify further.
pub async fn dispatch(
    client: &reqwest::Client,
    base_url: &str,
    pool: &AccountPool,
    lease: &AccountLease,
    payload: &GraziePayload,
) -> AppResult<reqwest::Response> {
    debug!(
        "Sending payload to Grazie API: {}",
        serde_json::to_string(payload).unwrap_or_default()
    );

    let jwt = lease.jwt();
    let mut response = send_chat_request(client, base_url, &jwt, payload).await?;

    if response.status().as_u16() == 401 {
        warn!("Upstream returned 401, refreshing token and retrying once");
        match pool.refresh_after_unauthorized(lease, &jwt).await {
            Ok(fresh) => {
                response = send_chat_request(client, base_url, &fresh, payload).await?;
            }
            Err(e) => {
                warn!("Token refresh after 401 failed: {}", e);
                // Surface the original 401 body.
            }
        }
    }

    if response.status().as_u16() == crate::constants::STATUS_OUT_OF_QUOTA {
        pool.mark_out_of_quota(lease);
    }

    Ok(response)
}

// ─── Assembler state machine ────────────────────────────────────────────────

/// Tool-call ids echoed back by clients must fit the upstream's ~40-char
/// limit: "call_" + 32 hex = 37.
fn new_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Everything known once the upstream stream terminates.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

/// One step of assembler output, dialect-agnostic.
#[derive(Debug)]
pub enum AssemblerStep {
    Text(String),
    Finished(StreamOutcome),
    Pending,
}

/// Core state machine: an ordered content accumulator and at most one open
/// tool call. A named fragment opens a new call (completing the previous
/// one); a nameless fragment extends the open call's argument buffer.
#[derive(Default)]
pub struct StreamAssembler {
    content: String,
    current_tool: Option<PendingToolCall>,
    completed: Vec<PendingToolCall>,
    finished: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, op: StreamOp) -> AssemblerStep {
        if self.finished {
            return AssemblerStep::Pending;
        }
        match op {
            StreamOp::Text(text) => {
                self.content.push_str(&text);
                AssemblerStep::Text(text)
            }
            StreamOp::ToolFragment {
                name: Some(name),
                args,
            } => {
                self.finalize_current_tool();
                self.current_tool = Some(PendingToolCall {
                    id: new_tool_call_id(),
                    name,
                    arguments: args,
                });
                AssemblerStep::Pending
            }
            StreamOp::ToolFragment { name: None, args } => {
                if let Some(tool) = self.current_tool.as_mut() {
                    tool.arguments.push_str(&args);
                }
                AssemblerStep::Pending
            }
            StreamOp::Finish { reason } => {
                self.finalize_current_tool();
                self.finished = true;
                AssemblerStep::Finished(self.outcome(reason))
            }
            StreamOp::Skip => AssemblerStep::Pending,
        }
    }

    fn finalize_current_tool(&mut self) {
        if let Some(tool) = self.current_tool.take() {
            self.completed.push(tool);
        }
    }

    fn outcome(&mut self, upstream_reason: Option<String>) -> StreamOutcome {
        let tool_calls: Vec<ToolCall> = self
            .completed
            .drain(..)
            .map(|tool| {
                // Malformed argument JSON from upstream is surfaced as-is.
                if !tool.arguments.is_empty()
                    && serde_json::from_str::<Value>(&tool.arguments).is_err()
                {
                    warn!(
                        "Tool call {} arguments are not valid JSON",
                        tool.name
                    );
                }
                ToolCall {
                    id: tool.id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: tool.name,
                        arguments: tool.arguments,
                    },
                }
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            upstream_reason.unwrap_or_else(|| "stop".to_string())
        } else {
            "tool_calls".to_string()
        };

        StreamOutcome {
            content: std::mem::take(&mut self.content),
            tool_calls,
            finish_reason,
        }
    }
}

// ─── OpenAI SSE emission ────────────────────────────────────────────────────

pub struct OpenAiSseWriter {
    stream_id: String,
    model: String,
    first_chunk_sent: bool,
}

impl OpenAiSseWriter {
    pub fn new(model: &str) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            model: model.to_string(),
            first_chunk_sent: false,
        }
    }

    fn frame(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let chunk = json!({
            "id": self.stream_id,
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": self.model,
            "choices": [{
                "delta": delta,
                "index": 0,
                "finish_reason": finish_reason
            }]
        });
        format!("data: {}\n\n", chunk)
    }

    /// The opening chunk carries `role: "assistant"` exactly once.
    pub fn content_frame(&mut self, text: &str) -> String {
        let delta = if self.first_chunk_sent {
            json!({"content": text})
        } else {
            self.first_chunk_sent = true;
            json!({"role": "assistant", "content": text})
        };
        self.frame(delta, None)
    }

    /// Tool-call chunk (if any), final chunk, then the `[DONE]` terminator.
    pub fn finish_frames(&mut self, outcome: &StreamOutcome) -> String {
        let mut out = String::new();
        if !outcome.tool_calls.is_empty() {
            let calls: Vec<Value> = outcome
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| {
                    json!({
                        "index": index,
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.function.name,
                            "arguments": call.function.arguments
                        }
                    })
                })
                .collect();
            out.push_str(&self.frame(json!({"tool_calls": calls}), None));
        }
        out.push_str(&self.frame(json!({}), Some(&outcome.finish_reason)));
        out.push_str("data: [DONE]\n\n");
        out
    }
}

// ─── Anthropic SSE emission ─────────────────────────────────────────────────

pub struct AnthropicSseWriter {
    message_id: String,
    model: String,
    started: bool,
}

impl AnthropicSseWriter {
    pub fn new(model: &str) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self {
            message_id: format!("msg_{}", &raw[..24]),
            model: model.to_string(),
            started: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    fn frame(event: &str, data: &Value) -> String {
        format!("event: {}\ndata: {}\n\n", event, data)
    }

    /// `message_start` + `content_block_start`, emitted once.
    pub fn open_frames(&mut self) -> String {
        if self.started {
            return String::new();
        }
        self.started = true;
        let mut out = Self::frame(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }
            }),
        );
        out.push_str(&Self::frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }),
        ));
        out
    }

    pub fn delta_frame(&mut self, text: &str) -> String {
        let mut out = self.open_frames();
        out.push_str(&Self::frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text}
            }),
        ));
        out
    }

    pub fn finish_frames(&mut self) -> String {
        let mut out = self.open_frames();
        out.push_str(&Self::frame(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": 0}),
        ));
        out.push_str(&Self::frame("message_stop", &json!({"type": "message_stop"})));
        out
    }
}

// ─── Aggregation (non-streaming) ────────────────────────────────────────────

/// Drain the upstream SSE body through the assembler without emitting
/// intermediate frames. A clean EOF without `FinishMetadata` still yields
/// whatever was assembled.
pub async fn aggregate_stream(response: reqwest::Response) -> AppResult<StreamOutcome> {
    let mut assembler = StreamAssembler::new();
    let mut lines = LineBuffer::new();
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk: Bytes = chunk?;
        for line in lines.push(&chunk) {
            if let AssemblerStep::Finished(outcome) = assembler.apply(parse_sse_line(&line)) {
                return Ok(outcome);
            }
        }
    }
    if let Some(rest) = lines.remainder() {
        if let AssemblerStep::Finished(outcome) = assembler.apply(parse_sse_line(&rest)) {
            return Ok(outcome);
        }
    }

    warn!("Upstream stream ended without FinishMetadata, aggregating partial output");
    Ok(assembler.apply(StreamOp::Finish { reason: None }).into_outcome())
}

impl AssemblerStep {
    fn into_outcome(self) -> StreamOutcome {
        match self {
            AssemblerStep::Finished(outcome) => outcome,
            _ => StreamOutcome {
                content: String::new(),
                tool_calls: Vec::new(),
                finish_reason: "stop".to_string(),
            },
        }
    }
}
