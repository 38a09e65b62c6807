//! Tool-definition sanitizer.
//!
//! The upstream accepts only a restricted JSON-Schema dialect for function
//! parameters: flat-ish objects, `[A-Za-z0-9_.-]{1,64}` property names, no
//! schema composers. This module rewrites arbitrary client schemas into that
//! dialect. The transform is deterministic and idempotent
//! (`sanitize(sanitize(t)) == sanitize(t)`), so results are safe to memoize.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::openai::{Tool, ToolFunction};

pub const MAX_NAME_LEN: usize = 64;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("valid name pattern"));

/// Nested objects wider than this collapse to a JSON-string parameter.
const MAX_OBJECT_WIDTH: usize = 15;
/// How many original properties survive a width collapse alongside `data`.
const WIDTH_COLLAPSE_KEEP: usize = 5;

const FORMAT_WHITELIST: [&str; 4] = ["email", "uri", "date", "date-time"];
const SCALAR_KEYWORDS: [&str; 9] = [
    "description",
    "enum",
    "pattern",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
];

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Strip disallowed characters and truncate; an emptied name becomes "param".
pub fn normalize_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
            if out.len() < MAX_NAME_LEN {
                out.push(ch);
            }
        }
    }
    if out.is_empty() {
        "param".to_string()
    } else {
        out
    }
}

/// Sanitize a tool list. Tools whose name violates the pattern are dropped;
/// every surviving tool gets a rewritten parameter schema.
pub fn sanitize_tools(tools: &[Tool]) -> Vec<Tool> {
    let mut out = Vec::with_capacity(tools.len());
    for tool in tools {
        if !is_valid_name(&tool.function.name) {
            warn!("Dropping tool with invalid name: {:?}", tool.function.name);
            continue;
        }
        let parameters = sanitize_parameters(tool.function.parameters.as_ref());
        out.push(Tool {
            kind: tool.kind.clone(),
            function: ToolFunction {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters: Some(parameters),
            },
        });
    }
    debug!("Sanitized {} of {} tool(s)", out.len(), tools.len());
    out
}

/// Rewrite a top-level parameter schema.
pub fn sanitize_parameters(params: Option<&Value>) -> Value {
    let Some(Value::Object(params)) = params else {
        return json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        });
    };

    let mut result = Map::new();
    if let Some(kind) = params.get("type") {
        result.insert("type".to_string(), kind.clone());
    }

    if let Some(Value::Object(props)) = params.get("properties") {
        if props.len() > MAX_OBJECT_WIDTH {
            // Very wide tools defeat the upstream's argument generation.
            // Collapse to one JSON-string parameter, keeping a handful of the
            // original properties so validators that expect real fields still
            // see them.
            let (collapsed, kept) = collapse_wide_object(props);
            result.insert("properties".to_string(), Value::Object(collapsed));
            let mut required = vec![Value::String("data".to_string())];
            required.extend(kept.into_iter().map(Value::String));
            result.insert("required".to_string(), Value::Array(required));
        } else {
            let sanitized = sanitize_properties(props, 1);
            result.insert("properties".to_string(), Value::Object(sanitized));
            if let Some(required) = rewrite_required(params.get("required"), &result) {
                result.insert("required".to_string(), required);
            }
        }
    } else if let Some(required) = rewrite_required(params.get("required"), &result) {
        result.insert("required".to_string(), required);
    }

    result.insert("additionalProperties".to_string(), Value::Bool(false));
    Value::Object(result)
}

fn collapse_wide_object(props: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
    let mut collapsed = Map::new();
    collapsed.insert(
        "data".to_string(),
        json!({
            "type": "string",
            "description": format!(
                "Provide all {} required fields as a single JSON string. \
                 Example: {{\"field1\":\"value1\",\"field2\":\"value2\"}}",
                props.len()
            )
        }),
    );

    let mut kept = Vec::new();
    for (name, schema) in props {
        if kept.len() >= WIDTH_COLLAPSE_KEEP {
            break;
        }
        let valid = normalize_name(name);
        if valid == "data" || collapsed.contains_key(&valid) {
            continue;
        }
        collapsed.insert(valid.clone(), sanitize_property(schema, 1));
        kept.push(valid);
    }

    (collapsed, kept)
}

/// Keep `required` entries that still name a property after normalization.
fn rewrite_required(required: Option<&Value>, result: &Map<String, Value>) -> Option<Value> {
    let Some(Value::Array(entries)) = required else {
        return None;
    };
    let props = result.get("properties").and_then(Value::as_object);
    let mut valid = Vec::new();
    for entry in entries {
        let Some(name) = entry.as_str() else { continue };
        let normalized = normalize_name(name);
        let present = props.map(|p| p.contains_key(&normalized)).unwrap_or(false);
        if present && !valid.iter().any(|v| v == &normalized) {
            valid.push(normalized);
        }
    }
    if valid.is_empty() {
        None
    } else {
        Some(Value::Array(valid.into_iter().map(Value::String).collect()))
    }
}

fn sanitize_properties(props: &Map<String, Value>, depth: usize) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, schema) in props {
        let valid = if is_valid_name(name) {
            name.clone()
        } else {
            normalize_name(name)
        };
        out.insert(valid, sanitize_property(schema, depth));
    }
    out
}

/// Rewrite one property schema. `depth` is 1 for direct properties of the
/// top-level object.
fn sanitize_property(schema: &Value, depth: usize) -> Value {
    let Some(schema) = schema.as_object() else {
        return json!({"type": "string"});
    };

    // Schema composers collapse to a string with a best-effort hint.
    if let Some(any_of) = schema.get("anyOf") {
        return collapse_any_of(any_of);
    }
    if schema.contains_key("oneOf") {
        return collapse_composer(schema, "oneOf");
    }
    if schema.contains_key("allOf") {
        return collapse_composer(schema, "allOf");
    }

    let kind = schema
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("string")
        .to_string();

    let mut result = Map::new();
    match kind.as_str() {
        "object" => {
            let Some(Value::Object(props)) = schema.get("properties") else {
                return json!({
                    "type": "string",
                    "description": "Object without properties - provide as JSON string"
                });
            };
            if props.len() > MAX_OBJECT_WIDTH {
                return json!({
                    "type": "string",
                    "description": "Complex object with many properties - provide as JSON string"
                });
            }
            // Beyond two levels of object nesting the middle object is
            // flattened into a JSON string.
            if depth >= 2 && has_object_children(props) {
                return json!({
                    "type": "string",
                    "description": "Nested object - provide as JSON string"
                });
            }
            result.insert("type".to_string(), Value::String("object".to_string()));
            let sanitized = sanitize_properties(props, depth + 1);
            result.insert("properties".to_string(), Value::Object(sanitized));
            if let Some(required) = rewrite_required(schema.get("required"), &result) {
                result.insert("required".to_string(), required);
            }
            result.insert("additionalProperties".to_string(), Value::Bool(false));
        }
        "array" => {
            result.insert("type".to_string(), Value::String("array".to_string()));
            let item_type = schema
                .get("items")
                .and_then(Value::as_object)
                .and_then(|items| items.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("string");
            // Nested item schemas are discarded beyond their type tag.
            result.insert("items".to_string(), json!({"type": item_type}));
        }
        other => {
            result.insert("type".to_string(), Value::String(other.to_string()));
        }
    }

    copy_scalar_keywords(schema, &mut result);
    Value::Object(result)
}

fn has_object_children(props: &Map<String, Value>) -> bool {
    props.values().any(|child| {
        child.get("type").and_then(Value::as_str) == Some("object")
            && child.get("properties").is_some()
    })
}

fn collapse_any_of(any_of: &Value) -> Value {
    let mut hints = Vec::new();
    if let Some(options) = any_of.as_array() {
        for option in options {
            if let Some(kind) = option.get("type").and_then(Value::as_str) {
                if kind == "null" {
                    hints.push("empty string for null".to_string());
                } else {
                    hints.push(format!("provide as {}", kind));
                }
            }
        }
    }
    let description = if hints.is_empty() {
        "Multi-type field - provide as string (use 'null' for null values)".to_string()
    } else {
        format!("Multi-type field: {}", hints.join(" or "))
    };
    json!({"type": "string", "description": description})
}

fn collapse_composer(schema: &Map<String, Value>, keyword: &str) -> Value {
    let description = schema
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Complex type ({}) simplified to string", keyword));
    json!({"type": "string", "description": description})
}

fn copy_scalar_keywords(schema: &Map<String, Value>, result: &mut Map<String, Value>) {
    for key in SCALAR_KEYWORDS {
        if let Some(value) = schema.get(key) {
            result.insert(key.to_string(), value.clone());
        }
    }
    if let Some(format) = schema.get("format").and_then(Value::as_str) {
        if FORMAT_WHITELIST.contains(&format) {
            result.insert("format".to_string(), Value::String(format.to_string()));
        }
    }
}
