//! Anthropic messages-dialect models and conversion to the canonical
//! chat-completion shape used by the rest of the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::openai::{ChatCompletionRequest, ChatMessage, Tool, ToolCall, ToolFunction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

// ─── Request conversion ─────────────────────────────────────────────────────

/// Rewrite an Anthropic request into the canonical chat-completion shape.
///
/// The top-level `system` field becomes a leading system message, tools map
/// 1:1 with `parameters = input_schema`, and `stop_sequences` is reduced to
/// its first entry (the upstream accepts a single stop).
pub fn to_chat_request(req: &AnthropicMessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    let system_text = extract_system_text(&req.system);
    if !system_text.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(Value::String(system_text)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in &req.messages {
        messages.push(ChatMessage {
            role: msg.role.clone(),
            content: Some(convert_content(&msg.content)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                kind: "function".to_string(),
                function: ToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.input_schema.clone()),
                },
            })
            .collect()
    });

    let stop = req
        .stop_sequences
        .as_ref()
        .and_then(|seqs| seqs.first())
        .map(|s| Value::String(s.clone()));

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        stream: req.stream,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        top_p: req.top_p,
        tools,
        tool_choice: None,
        stop,
    }
}

fn extract_system_text(system: &Option<Value>) -> String {
    match system {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => {
            let mut parts = Vec::new();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        parts.push(text.to_string());
                    }
                }
            }
            parts.join("\n")
        }
        Some(_) => String::new(),
    }
}

/// Convert Anthropic content blocks to the canonical multimodal shape.
/// Text blocks pass through; base64 image sources become `image_url` blocks
/// with a data URL.
fn convert_content(content: &Value) -> Value {
    match content {
        Value::String(_) => content.clone(),
        Value::Array(blocks) => {
            let mut converted = Vec::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => converted.push(block.clone()),
                    Some("image") => {
                        let media_type = block
                            .pointer("/source/media_type")
                            .and_then(Value::as_str)
                            .unwrap_or("image/png");
                        let data = block
                            .pointer("/source/data")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        converted.push(json!({
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", media_type, data)
                            }
                        }));
                    }
                    _ => {}
                }
            }
            Value::Array(converted)
        }
        other => other.clone(),
    }
}

// ─── Response conversion ────────────────────────────────────────────────────

pub fn map_finish_reason(openai_reason: &str) -> &'static str {
    match openai_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Build the non-streaming Anthropic response body from assembled output.
pub fn build_messages_response(
    message_id: &str,
    model: &str,
    content: &str,
    tool_calls: &[ToolCall],
    finish_reason: &str,
) -> Value {
    let mut blocks = Vec::new();
    if !content.is_empty() {
        blocks.push(json!({"type": "text", "text": content}));
    }
    for call in tool_calls {
        let input: Value =
            serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input
        }));
    }

    json!({
        "id": message_id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": blocks,
        "stop_reason": map_finish_reason(finish_reason),
        "stop_sequence": null,
        "usage": {"input_tokens": 0, "output_tokens": 0}
    })
}
