//! OpenAI chat-completions protocol models.
//!
//! Message `content` stays a `serde_json::Value` because clients send both
//! plain strings and multimodal block arrays; the extraction helpers below
//! normalize the two shapes.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

// ─── Response shapes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatMessage,
    pub index: u32,
    pub finish_reason: String,
}

/// Zero-filled usage block: the upstream does not report token counts.
pub fn empty_usage() -> Value {
    serde_json::json!({
        "prompt_tokens": 0,
        "completion_tokens": 0,
        "total_tokens": 0
    })
}

// ─── Content extraction ─────────────────────────────────────────────────────

/// One decoded image attachment from a multimodal content array.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePart {
    pub media_type: String,
    pub data: String,
}

/// A content array flattened into ordered text / image parts.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(ImagePart),
}

/// Extract the joined text of a message content (string or block array).
pub fn extract_text_content(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => {
            let mut parts = Vec::new();
            for item in items {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        parts.push(text.to_string());
                    }
                }
            }
            parts.join(" ")
        }
        Some(_) => String::new(),
    }
}

/// Flatten a content value into ordered parts, decoding `image_url` blocks
/// with `data:` URLs. Images that fail validation (non-image media type or
/// undecodable base64) are dropped with a warning.
pub fn extract_content_parts(content: &Option<Value>) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    match content {
        None => {}
        Some(Value::String(text)) => parts.push(ContentPart::Text(text.clone())),
        Some(Value::Array(items)) => {
            for item in items {
                match item.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            parts.push(ContentPart::Text(text.to_string()));
                        }
                    }
                    Some("image_url") => {
                        let url = item
                            .pointer("/image_url/url")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        match parse_data_url(url) {
                            Some(image) => parts.push(ContentPart::Image(image)),
                            None => {
                                warn!("Dropping invalid image attachment (bad media type or base64)");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(_) => {}
    }
    parts
}

/// Parse and validate `data:image/<fmt>;base64,<payload>`.
fn parse_data_url(url: &str) -> Option<ImagePart> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.split(';').next().unwrap_or("");
    if !media_type.starts_with("image/") || payload.is_empty() {
        return None;
    }
    // Validate the declared encoding without keeping the decoded bytes.
    BASE64_STANDARD.decode(payload).ok()?;
    Some(ImagePart {
        media_type: media_type.to_string(),
        data: payload.to_string(),
    })
}
