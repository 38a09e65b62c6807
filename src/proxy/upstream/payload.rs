//! Grazie chat payload construction.
//!
//! The upstream takes `{prompt, profile, chat:{messages}, parameters:{data}}`
//! where every message carries a `type` tag. This module owns the canonical
//! request → upstream translation, including the multimodal fan-out and the
//! tool-call id → function name recovery for `tool` role messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::constants::CHAT_PROMPT_TAG;
use crate::proxy::mappers::openai::{
    extract_content_parts, extract_text_content, ChatMessage, ContentPart, Tool,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraziePayload {
    pub prompt: String,
    pub profile: String,
    pub chat: GrazieChat,
    pub parameters: GrazieParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrazieChat {
    pub messages: Vec<GrazieMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GrazieParameters {
    pub data: Vec<GrazieParamData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrazieParamData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GrazieMessage {
    #[serde(rename = "system_message")]
    System { content: String },

    #[serde(rename = "user_message")]
    User { content: String },

    #[serde(rename = "assistant_message_text")]
    AssistantText { content: String },

    #[serde(rename = "assistant_message_tool")]
    AssistantTool {
        content: String,
        #[serde(rename = "functionCall")]
        function_call: GrazieFunctionCall,
    },

    #[serde(rename = "tool_message")]
    ToolResult {
        content: String,
        #[serde(rename = "functionName")]
        function_name: String,
    },

    #[serde(rename = "media_message")]
    Media {
        #[serde(rename = "mediaType")]
        media_type: String,
        data: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrazieFunctionCall {
    #[serde(rename = "functionName")]
    pub function_name: String,
    pub content: String,
}

// ─── Message translation ────────────────────────────────────────────────────

/// Convert canonical chat messages to the upstream message sequence.
pub fn to_grazie_messages(messages: &[ChatMessage]) -> Vec<GrazieMessage> {
    // One pass to recover function names for later tool-result messages.
    let mut tool_names: HashMap<String, String> = HashMap::new();
    for msg in messages {
        if msg.role == "assistant" {
            if let Some(calls) = &msg.tool_calls {
                for call in calls {
                    if !call.id.is_empty() && !call.function.name.is_empty() {
                        tool_names.insert(call.id.clone(), call.function.name.clone());
                    }
                }
            }
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role.as_str() {
            "system" => out.push(GrazieMessage::System {
                content: extract_text_content(&msg.content),
            }),
            "user" => convert_user_message(msg, &mut out),
            "assistant" => {
                let content = extract_text_content(&msg.content);
                match msg.tool_calls.as_ref().and_then(|calls| calls.first()) {
                    Some(call) => {
                        // Upstream accepts a single function call per
                        // assistant turn; extra calls are dropped here.
                        out.push(GrazieMessage::AssistantTool {
                            content,
                            function_call: GrazieFunctionCall {
                                function_name: call.function.name.clone(),
                                content: canonicalize_arguments(&call.function.arguments),
                            },
                        });
                    }
                    None => out.push(GrazieMessage::AssistantText { content }),
                }
            }
            "tool" => {
                let call_id = msg.tool_call_id.as_deref().unwrap_or("");
                match tool_names.get(call_id) {
                    Some(function_name) => out.push(GrazieMessage::ToolResult {
                        content: extract_text_content(&msg.content),
                        function_name: function_name.clone(),
                    }),
                    None => {
                        warn!("Cannot find function name for tool_call_id {:?}", call_id);
                    }
                }
            }
            _ => out.push(GrazieMessage::User {
                content: extract_text_content(&msg.content),
            }),
        }
    }
    out
}

/// User messages fan out: each text block becomes its own `user_message`,
/// each image a `media_message`, order preserved.
fn convert_user_message(msg: &ChatMessage, out: &mut Vec<GrazieMessage>) {
    let parts = extract_content_parts(&msg.content);
    if parts.is_empty() {
        out.push(GrazieMessage::User {
            content: String::new(),
        });
        return;
    }
    for part in parts {
        match part {
            ContentPart::Text(text) => out.push(GrazieMessage::User { content: text }),
            ContentPart::Image(image) => out.push(GrazieMessage::Media {
                media_type: image.media_type,
                data: image.data,
            }),
        }
    }
}

/// Re-canonicalize tool-call arguments via parse-then-serialize so upstream
/// sees clean JSON; invalid input passes through untouched.
fn canonicalize_arguments(arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| arguments.to_string()),
        Err(_) => arguments.to_string(),
    }
}

/// Assemble the full upstream payload for one request.
pub fn build_payload(
    profile: &str,
    messages: Vec<GrazieMessage>,
    tools: Option<&[Tool]>,
) -> GraziePayload {
    let mut data = Vec::new();
    if let Some(tools) = tools {
        if !tools.is_empty() {
            let functions: Vec<_> = tools.iter().map(|t| t.function.clone()).collect();
            data.push(GrazieParamData {
                kind: "json".to_string(),
                fqdn: Some("llm.parameters.functions".to_string()),
                value: None,
            });
            data.push(GrazieParamData {
                kind: "json".to_string(),
                fqdn: None,
                value: Some(serde_json::to_string(&functions).unwrap_or_default()),
            });
        }
    }

    GraziePayload {
        prompt: CHAT_PROMPT_TAG.to_string(),
        profile: profile.to_string(),
        chat: GrazieChat { messages },
        parameters: GrazieParameters { data },
    }
}
