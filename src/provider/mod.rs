//! Model gateway boundary (OpenAI-compatible Chat Completions API).
//!
//! One concrete streaming client; the base URL is configurable so tests can
//! point it at a local mock. Conversion from the UI wire model to provider
//! messages lives in [`convert`].

mod convert;
mod gateway;

pub use convert::to_model_messages;
pub use gateway::GatewayClient;

use serde::Serialize;
use serde_json::Value;

/// A callable tool, advertised to the model in function-calling format.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Chat message in the provider's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ModelMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ModelToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ModelMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    /// Assistant message announcing tool calls, optionally with text.
    pub fn assistant_calls(content: Option<String>, tool_calls: Vec<ModelToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Tool result message answering a specific call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ModelFunctionCall,
}

impl ModelToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: String) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: ModelFunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Events the gateway stream yields to the orchestration loop.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart {
        call_id: String,
        name: String,
    },
    ToolCallDelta {
        call_id: String,
        arguments_delta: String,
    },
    /// Arguments are complete; carries the accumulated argument text.
    ToolCallEnd {
        call_id: String,
        name: String,
        arguments: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Error(String),
    Done,
}
