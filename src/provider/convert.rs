//! UI conversation to provider message conversion.
//!
//! Text parts concatenate into message content. Completed tool parts are
//! replayed as an assistant `tool_calls` entry plus a `tool` result message,
//! the ordering the Chat Completions API requires. Incomplete calls and
//! part kinds this crate does not model are skipped.

use serde_json::Value;

use super::{ModelMessage, ModelToolCall};
use crate::message::{IMAGE_TOOL_NAME, Part, Role, ToolCallState, ToolInvocation, UiMessage};

/// Convert a (sanitized) conversation into provider messages, with the
/// fixed system instruction first.
pub fn to_model_messages(system: &str, messages: &[UiMessage]) -> Vec<ModelMessage> {
    let mut out = vec![ModelMessage::system(system)];

    for message in messages {
        match message.role {
            Role::System => {
                let content = joined_text(&message.parts);
                if !content.is_empty() {
                    out.push(ModelMessage::system(content));
                }
            }
            Role::User => {
                let content = joined_text(&message.parts);
                if !content.is_empty() {
                    out.push(ModelMessage::text("user", content));
                }
            }
            Role::Assistant => {
                let mut content = String::new();
                let mut tool_calls = Vec::new();
                let mut tool_results = Vec::new();

                for part in &message.parts {
                    match part {
                        Part::Text { text } => {
                            if !content.is_empty() {
                                content.push('\n');
                            }
                            content.push_str(text);
                        }
                        Part::GenerateImage(inv) => match inv.state {
                            ToolCallState::OutputAvailable | ToolCallState::OutputError => {
                                let arguments = inv
                                    .input
                                    .as_ref()
                                    .map(Value::to_string)
                                    .unwrap_or_else(|| "{}".into());
                                tool_calls.push(ModelToolCall::function(
                                    &inv.tool_call_id,
                                    IMAGE_TOOL_NAME,
                                    arguments,
                                ));
                                tool_results.push((inv.tool_call_id.clone(), result_content(inv)));
                            }
                            // Calls without a result cannot be replayed.
                            ToolCallState::InputStreaming | ToolCallState::InputAvailable => {}
                        },
                        Part::Opaque(_) => {}
                    }
                }

                if tool_calls.is_empty() {
                    if !content.is_empty() {
                        out.push(ModelMessage::text("assistant", content));
                    }
                } else {
                    let content = (!content.is_empty()).then_some(content);
                    out.push(ModelMessage::assistant_calls(content, tool_calls));
                    for (call_id, result) in tool_results {
                        out.push(ModelMessage::tool_result(call_id, result));
                    }
                }
            }
        }
    }

    out
}

fn joined_text(parts: &[Part]) -> String {
    let mut content = String::new();
    for part in parts {
        if let Part::Text { text } = part {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(text);
        }
    }
    content
}

/// Tool message content for a finished call. A string output (the sanitized
/// form) is passed through as-is rather than re-encoded.
fn result_content(inv: &ToolInvocation) -> String {
    match inv.state {
        ToolCallState::OutputError => inv
            .error_text
            .clone()
            .unwrap_or_else(|| "tool execution failed".into()),
        _ => match &inv.output {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "{}".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SYSTEM: &str = "You are a test assistant";

    fn completed_call(output: Value) -> Part {
        Part::GenerateImage(ToolInvocation {
            tool_call_id: "call_1".into(),
            state: ToolCallState::OutputAvailable,
            input: Some(json!({"prompt": "a cat"})),
            output: Some(output),
            error_text: None,
        })
    }

    #[test]
    fn fixed_system_instruction_comes_first() {
        let messages = vec![UiMessage::user("hi")];
        let converted = to_model_messages(SYSTEM, &messages);

        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[0].content.as_deref(), Some(SYSTEM));
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[1].content.as_deref(), Some("hi"));
    }

    #[test]
    fn text_parts_concatenate_with_newlines() {
        let message = UiMessage {
            id: "u1".into(),
            role: Role::User,
            parts: vec![Part::text("first"), Part::text("second")],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        assert_eq!(converted[1].content.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn completed_call_becomes_call_plus_result() {
        let message = UiMessage {
            id: "a1".into(),
            role: Role::Assistant,
            parts: vec![
                Part::text("here you go"),
                completed_call(Value::String("{\"prompt\":\"a cat\"}".into())),
            ],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        assert_eq!(converted.len(), 3);

        let assistant = &converted[1];
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content.as_deref(), Some("here you go"));
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "generateImage");
        assert_eq!(calls[0].function.arguments, "{\"prompt\":\"a cat\"}");

        let result = &converted[2];
        assert_eq!(result.role, "tool");
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(result.content.as_deref(), Some("{\"prompt\":\"a cat\"}"));
    }

    #[test]
    fn string_output_is_not_double_encoded() {
        let message = UiMessage {
            id: "a1".into(),
            role: Role::Assistant,
            parts: vec![completed_call(Value::String("{\"prompt\":\"a cat\"}".into()))],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        let result = converted.last().unwrap();
        assert_eq!(result.content.as_deref(), Some("{\"prompt\":\"a cat\"}"));
    }

    #[test]
    fn object_output_is_serialized() {
        let message = UiMessage {
            id: "a1".into(),
            role: Role::Assistant,
            parts: vec![completed_call(json!({"prompt": "a cat"}))],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        let result = converted.last().unwrap();
        assert_eq!(result.content.as_deref(), Some("{\"prompt\":\"a cat\"}"));
    }

    #[test]
    fn errored_call_replays_its_error_text() {
        let message = UiMessage {
            id: "a1".into(),
            role: Role::Assistant,
            parts: vec![Part::GenerateImage(ToolInvocation {
                tool_call_id: "call_2".into(),
                state: ToolCallState::OutputError,
                input: Some(json!({"prompt": "a dog"})),
                output: None,
                error_text: Some("image backend unavailable".into()),
            })],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        let result = converted.last().unwrap();
        assert_eq!(result.role, "tool");
        assert_eq!(result.content.as_deref(), Some("image backend unavailable"));
    }

    #[test]
    fn incomplete_calls_and_unknown_parts_are_skipped() {
        let message = UiMessage {
            id: "a1".into(),
            role: Role::Assistant,
            parts: vec![
                Part::text("working on it"),
                Part::GenerateImage(ToolInvocation {
                    tool_call_id: "call_3".into(),
                    state: ToolCallState::InputStreaming,
                    input: None,
                    output: None,
                    error_text: None,
                }),
                Part::Opaque(json!({"type": "step-start"})),
            ],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1].role, "assistant");
        assert!(converted[1].tool_calls.is_none());
    }

    #[test]
    fn system_turns_are_forwarded_after_the_fixed_instruction() {
        let message = UiMessage {
            id: "s1".into(),
            role: Role::System,
            parts: vec![Part::text("answer in French")],
        };
        let converted = to_model_messages(SYSTEM, &[message]);

        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1].role, "system");
        assert_eq!(converted[1].content.as_deref(), Some("answer in French"));
    }
}
