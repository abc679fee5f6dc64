//! Chat-completion stream records (`{choices:[{delta:{...}}]}`).
//!
//! Records are parsed in two steps: the payload must be valid JSON (anything
//! else is a malformed record), then the first choice's delta is read
//! leniently. A valid JSON payload that has no usable delta is not an error;
//! it simply carries neither content nor tool calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl Delta {
    /// Read `choices[0].delta` out of an already-parsed record.
    ///
    /// Any non-null `tool_calls` value marks the delta as a tool call, even
    /// when its elements have an unexpected shape. Usable fields are pulled
    /// out per element and the rest is skipped.
    pub fn from_record(record: &Value) -> Delta {
        let Some(delta) = record.pointer("/choices/0/delta") else {
            return Delta::default();
        };
        let content = delta
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);
        let tool_calls = match delta.get("tool_calls") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                Some(items.iter().filter_map(ToolCallDelta::lenient).collect())
            }
            Some(other) => {
                tracing::warn!(value = %other, "tool_calls is not a list; ignoring its contents");
                Some(Vec::new())
            }
        };
        Delta {
            content,
            tool_calls,
        }
    }

    /// Any `tool_calls` key counts, including an empty list.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.is_some()
    }

    /// Non-empty content text, if the delta carries any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

impl ToolCallDelta {
    fn lenient(item: &Value) -> Option<ToolCallDelta> {
        let Some(item) = item.as_object() else {
            tracing::warn!(value = %item, "Skipping tool call element that is not an object");
            return None;
        };
        let index = match item.get("index") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        let id = item.get("id").and_then(Value::as_str).map(str::to_string);
        let function = item.get("function").and_then(Value::as_object).map(|f| {
            let name = f.get("name").and_then(Value::as_str).map(str::to_string);
            let arguments = match f.get("arguments") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => {
                    tracing::warn!(value = %other, "Skipping tool call arguments that are not a string");
                    None
                }
            };
            FunctionDelta { name, arguments }
        });
        Some(ToolCallDelta {
            index,
            id,
            function,
        })
    }
}

impl ChatChunk {
    /// A single-choice chunk carrying only `content`, shaped like a model delta.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Delta {
                    content: Some(text.into()),
                    tool_calls: None,
                },
            }],
        }
    }

    /// Frame the chunk as one event-stream record, newline included.
    pub fn to_sse_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{}{}\n", crate::sse::DATA_PREFIX, json)
    }
}

const CONFIRMATION_PREFIX: &str = "\u{2705} Task \"";
const CONFIRMATION_SUFFIX: &str = "\" created!";

/// Text of the chunk the relay emits after a `create_task` tool call.
pub fn task_confirmation(title: &str) -> String {
    format!("{}{}{}", CONFIRMATION_PREFIX, title, CONFIRMATION_SUFFIX)
}

/// Whether a content fragment is a relay-issued task confirmation.
pub fn is_task_confirmation(text: &str) -> bool {
    text.starts_with(CONFIRMATION_PREFIX) && text.ends_with(CONFIRMATION_SUFFIX)
}
