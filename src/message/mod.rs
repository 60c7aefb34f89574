//! UI message wire model shared by the relay and the terminal client.
//!
//! Shapes match the browser protocol: camelCase keys, parts tagged by
//! `"type"`, tool parts tagged `tool-<name>`. Part kinds this crate does
//! not model round-trip untouched through the opaque variant.

mod events;
mod sanitize;

pub use events::UiEvent;
pub use sanitize::sanitize_messages;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name the image tool is registered under. Its parts are tagged
/// `tool-<name>`; the serde rename on [`Part::GenerateImage`] must match.
pub const IMAGE_TOOL_NAME: &str = "generateImage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl UiMessage {
    /// A fresh user turn holding a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            parts: Vec::new(),
        }
    }
}

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool-generateImage")]
    GenerateImage(ToolInvocation),
    /// Any other `"type"` tag passes through unmodified.
    #[serde(untagged)]
    Opaque(Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// Lifecycle of a tool call as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

/// A tool-call part. `input` appears once arguments are complete, `output`
/// only in `output-available`, `error_text` only in `output-error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub state: ToolCallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolInvocation {
    pub fn started(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            state: ToolCallState::InputStreaming,
            input: None,
            output: None,
            error_text: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_part_wire_shape() {
        let part = Part::text("hello");
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({"type": "text", "text": "hello"})
        );
    }

    #[test]
    fn tool_part_wire_shape() {
        let part = Part::GenerateImage(ToolInvocation {
            tool_call_id: "call_1".into(),
            state: ToolCallState::InputAvailable,
            input: Some(json!({"prompt": "a cat"})),
            output: None,
            error_text: None,
        });
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({
                "type": "tool-generateImage",
                "toolCallId": "call_1",
                "state": "input-available",
                "input": {"prompt": "a cat"},
            })
        );
    }

    #[test]
    fn unknown_part_kind_round_trips() {
        let wire = json!({"type": "step-start"});
        let part: Part = serde_json::from_value(wire.clone()).unwrap();
        assert!(matches!(part, Part::Opaque(_)));
        assert_eq!(serde_json::to_value(&part).unwrap(), wire);
    }

    #[test]
    fn unknown_tool_part_round_trips() {
        let wire = json!({
            "type": "tool-webSearch",
            "toolCallId": "call_9",
            "state": "output-available",
            "output": {"hits": 3},
        });
        let part: Part = serde_json::from_value(wire.clone()).unwrap();
        assert!(matches!(part, Part::Opaque(_)));
        assert_eq!(serde_json::to_value(&part).unwrap(), wire);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), json!("assistant"));
    }

    #[test]
    fn message_accepts_missing_id() {
        let msg: UiMessage = serde_json::from_value(json!({
            "role": "user",
            "parts": [{"type": "text", "text": "hi"}],
        }))
        .unwrap();
        assert_eq!(msg.id, "");
        assert_eq!(msg.parts.len(), 1);
    }
}
