// src/llm/types.rs
// Shapes flowing between the client, the orchestrator, and the upstream
// provider. The gateway forwards Anthropic-compatible request bodies mostly
// untouched, so bodies stay as serde_json::Value; only the pieces the loop
// needs (text, tool calls) are lifted into typed values.

use serde_json::{Map, Value, json};
use tracing::warn;
use uuid::Uuid;

/// Wire shape the upstream reply arrived in. Databricks serving endpoints
/// answer in either shape depending on the served model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageShape {
    /// `{content: [{type: "text"|"tool_use", ...}], stop_reason, ...}`
    Anthropic,
    /// `{choices: [{message: {content, tool_calls}}], ...}`
    OpenAi,
}

/// A tool invocation requested by the model, normalized from either shape.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Stable id; assigned when the upstream omitted one
    pub id: String,
    /// Tool name before alias resolution
    pub name: String,
    /// Parsed argument mapping (open-world dictionary)
    pub arguments: Map<String, Value>,
    /// The upstream object, kept for logging
    pub raw: Value,
}

impl ToolCall {
    pub fn new(id: Option<String>, name: impl Into<String>, arguments: &Value, raw: Value) -> Self {
        let name = name.into();
        Self {
            id: id.unwrap_or_else(generate_call_id),
            arguments: normalize_arguments(&name, arguments),
            name,
            raw,
        }
    }

    /// Fetch a string argument, accepting any of the given synonyms.
    pub fn str_arg(&self, keys: &[&str]) -> Option<String> {
        for key in keys {
            if let Some(v) = self.arguments.get(*key) {
                match v {
                    Value::String(s) => return Some(s.clone()),
                    Value::Number(n) => return Some(n.to_string()),
                    _ => {}
                }
            }
        }
        None
    }

    pub fn u64_arg(&self, keys: &[&str]) -> Option<u64> {
        for key in keys {
            if let Some(n) = self.arguments.get(*key).and_then(Value::as_u64) {
                return Some(n);
            }
        }
        None
    }

    pub fn i64_arg(&self, keys: &[&str]) -> Option<i64> {
        for key in keys {
            if let Some(n) = self.arguments.get(*key).and_then(Value::as_i64) {
                return Some(n);
            }
        }
        None
    }

    pub fn bool_arg(&self, keys: &[&str]) -> Option<bool> {
        for key in keys {
            if let Some(b) = self.arguments.get(*key).and_then(Value::as_bool) {
                return Some(b);
            }
        }
        None
    }
}

fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Models send arguments either as a JSON string or as a structured object.
/// Invalid JSON yields an empty mapping with a warning.
pub fn normalize_arguments(tool: &str, raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                // Non-object JSON: wrap under "value" so nothing is lost
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
            Err(e) => {
                warn!(tool = %tool, error = %e, "Unparseable tool arguments, treating as empty");
                Map::new()
            }
        },
        Value::Null => Map::new(),
        other => {
            warn!(tool = %tool, args = %other, "Unexpected tool argument type, treating as empty");
            Map::new()
        }
    }
}

/// The assistant message lifted out of an upstream response body.
#[derive(Debug, Clone)]
pub struct ParsedAssistant {
    /// The full upstream message object (appended to the transcript as-is)
    pub message: Value,
    /// Concatenated text content
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub shape: MessageShape,
}

impl ParsedAssistant {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Extract the assistant message and its tool calls from an upstream body.
/// Returns None when the body has neither an Anthropic content array nor an
/// OpenAI choices list (the caller treats that as a provider parse error).
pub fn parse_assistant(body: &Value) -> Option<ParsedAssistant> {
    if let Some(content) = body.get("content").and_then(Value::as_array) {
        return Some(parse_anthropic(body, content));
    }
    if let Some(message) = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
    {
        return Some(parse_openai(message));
    }
    None
}

fn parse_anthropic(body: &Value, content: &[Value]) -> ParsedAssistant {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                tool_calls.push(ToolCall::new(id, name, &input, block.clone()));
            }
            _ => {}
        }
    }

    ParsedAssistant {
        message: body.clone(),
        text,
        tool_calls,
        shape: MessageShape::Anthropic,
    }
}

fn parse_openai(message: &Value) -> ParsedAssistant {
    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let id = call.get("id").and_then(Value::as_str).map(str::to_string);
                    let function = call.get("function");
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let arguments = function
                        .and_then(|f| f.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    ToolCall::new(id, name, &arguments, call.clone())
                })
                .collect()
        })
        .unwrap_or_default();

    ParsedAssistant {
        message: message.clone(),
        text,
        tool_calls,
        shape: MessageShape::OpenAi,
    }
}

/// Build a terminal Anthropic-shaped assistant message (used for synthesized
/// limit-reached replies and cache-level bookkeeping).
pub fn synthesize_assistant_message(model: &str, text: &str, stop_reason: &str) -> Value {
    json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": stop_reason,
        "usage": {"input_tokens": 0, "output_tokens": 0},
    })
}
