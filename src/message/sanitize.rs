//! Conversation history sanitizer.
//!
//! Completed image generations carry the full base64 payload in their tool
//! output. Replaying that into the model's context window would burn tokens
//! on data the model cannot use, so assistant history is forwarded as a
//! derived copy with the payload stripped. The original turns are never
//! modified; the client keeps rendering from its own copy.

use serde_json::Value;

use super::{Part, Role, ToolCallState, ToolInvocation, UiMessage};

/// Produce the sanitized view of a conversation.
///
/// Only assistant turns are touched, and within those only
/// `tool-generateImage` parts in state `output-available` whose output
/// carries a non-empty `image` field. Everything else comes back as an
/// untouched copy. Idempotent: a second pass sees the already-serialized
/// output and leaves it alone.
pub fn sanitize_messages(messages: &[UiMessage]) -> Vec<UiMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::Assistant => UiMessage {
                parts: message.parts.iter().map(sanitize_part).collect(),
                ..message.clone()
            },
            _ => message.clone(),
        })
        .collect()
}

fn sanitize_part(part: &Part) -> Part {
    match part {
        Part::GenerateImage(inv)
            if inv.state == ToolCallState::OutputAvailable
                && has_image_payload(inv.output.as_ref()) =>
        {
            Part::GenerateImage(ToolInvocation {
                output: inv.output.as_ref().map(strip_image_payload),
                ..inv.clone()
            })
        }
        other => other.clone(),
    }
}

fn has_image_payload(output: Option<&Value>) -> bool {
    match output.and_then(|o| o.get("image")) {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Serialize the output minus its `image` key. The string form is what the
/// model sees when the turn is replayed.
fn strip_image_payload(output: &Value) -> Value {
    let mut stripped = output.as_object().cloned().unwrap_or_default();
    stripped.remove("image");
    Value::String(Value::Object(stripped).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_part(output: Value) -> Part {
        Part::GenerateImage(ToolInvocation {
            tool_call_id: "call_1".into(),
            state: ToolCallState::OutputAvailable,
            input: Some(json!({"prompt": "a cat"})),
            output: Some(output),
            error_text: None,
        })
    }

    fn assistant_with(parts: Vec<Part>) -> UiMessage {
        UiMessage {
            id: "m1".into(),
            role: Role::Assistant,
            parts,
        }
    }

    #[test]
    fn replaces_output_with_serialized_copy() {
        let history = vec![assistant_with(vec![image_part(
            json!({"image": "AAAA", "prompt": "a cat"}),
        )])];

        let sanitized = sanitize_messages(&history);

        let Part::GenerateImage(inv) = &sanitized[0].parts[0] else {
            panic!("part kind changed");
        };
        assert_eq!(
            inv.output,
            Some(Value::String("{\"prompt\":\"a cat\"}".into()))
        );
        assert_eq!(inv.state, ToolCallState::OutputAvailable);
        assert_eq!(inv.input, Some(json!({"prompt": "a cat"})));
    }

    #[test]
    fn preserves_other_output_fields() {
        let history = vec![assistant_with(vec![image_part(
            json!({"image": "AAAA", "prompt": "a cat", "size": "1024x1024"}),
        )])];

        let sanitized = sanitize_messages(&history);

        let Part::GenerateImage(inv) = &sanitized[0].parts[0] else {
            panic!("part kind changed");
        };
        let serialized = inv.output.as_ref().unwrap().as_str().unwrap();
        let restored: Value = serde_json::from_str(serialized).unwrap();
        assert_eq!(restored["prompt"], "a cat");
        assert_eq!(restored["size"], "1024x1024");
        assert!(restored.get("image").is_none());
    }

    #[test]
    fn does_not_mutate_the_input() {
        let history = vec![assistant_with(vec![image_part(
            json!({"image": "AAAA", "prompt": "a cat"}),
        )])];

        let _ = sanitize_messages(&history);

        let Part::GenerateImage(inv) = &history[0].parts[0] else {
            panic!("part kind changed");
        };
        assert_eq!(inv.output.as_ref().unwrap()["image"], "AAAA");
    }

    #[test]
    fn is_idempotent() {
        let history = vec![assistant_with(vec![image_part(
            json!({"image": "AAAA", "prompt": "a cat"}),
        )])];

        let once = sanitize_messages(&history);
        let twice = sanitize_messages(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_user_and_system_turns_alone() {
        let user = UiMessage {
            id: "u1".into(),
            role: Role::User,
            parts: vec![image_part(json!({"image": "AAAA", "prompt": "a cat"}))],
        };
        let system = UiMessage {
            id: "s1".into(),
            role: Role::System,
            parts: vec![Part::text("be brief")],
        };

        let sanitized = sanitize_messages(&[user.clone(), system.clone()]);
        assert_eq!(sanitized[0], user);
        assert_eq!(sanitized[1], system);
    }

    #[test]
    fn leaves_incomplete_and_failed_calls_alone() {
        let pending = Part::GenerateImage(ToolInvocation {
            tool_call_id: "call_2".into(),
            state: ToolCallState::InputAvailable,
            input: Some(json!({"prompt": "a dog"})),
            output: None,
            error_text: None,
        });
        let failed = Part::GenerateImage(ToolInvocation {
            tool_call_id: "call_3".into(),
            state: ToolCallState::OutputError,
            input: Some(json!({"prompt": "a dog"})),
            output: None,
            error_text: Some("backend unavailable".into()),
        });
        let message = assistant_with(vec![pending.clone(), failed.clone()]);

        let sanitized = sanitize_messages(&[message]);
        assert_eq!(sanitized[0].parts[0], pending);
        assert_eq!(sanitized[0].parts[1], failed);
    }

    #[test]
    fn missing_or_empty_image_is_a_no_op() {
        let no_image = image_part(json!({"prompt": "a cat"}));
        let empty_image = image_part(json!({"image": "", "prompt": "a cat"}));
        let null_image = image_part(json!({"image": null, "prompt": "a cat"}));
        let message = assistant_with(vec![
            no_image.clone(),
            empty_image.clone(),
            null_image.clone(),
        ]);

        let sanitized = sanitize_messages(&[message]);
        assert_eq!(sanitized[0].parts[0], no_image);
        assert_eq!(sanitized[0].parts[1], empty_image);
        assert_eq!(sanitized[0].parts[2], null_image);
    }

    #[test]
    fn text_and_opaque_parts_pass_through() {
        let text = Part::text("here you go");
        let opaque = Part::Opaque(json!({"type": "step-start"}));
        let message = assistant_with(vec![text.clone(), opaque.clone()]);

        let sanitized = sanitize_messages(&[message]);
        assert_eq!(sanitized[0].parts[0], text);
        assert_eq!(sanitized[0].parts[1], opaque);
    }
}
