//! Terminal chat client.
//!
//! [`ChatClient`] owns the conversation state machine and talks to the
//! relay's `/api/chat` endpoint. The REPL drives it: submit input, apply
//! the streamed events as they arrive, render the updated turns.

pub mod repl;
mod stream;

pub use repl::Repl;

use std::collections::HashMap;

use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialStore;
use crate::message::{IMAGE_TOOL_NAME, Part, Role, ToolCallState, ToolInvocation, UiEvent, UiMessage};

/// What the conversation is doing. Input is accepted only in `Ready` and
/// `Error`; a submit while a response is in flight is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Ready,
    Submitted,
    Streaming,
    Error,
}

/// Ordered turns plus the streaming bookkeeping needed to route incoming
/// events onto the trailing assistant turn.
#[derive(Debug)]
pub struct Conversation {
    messages: Vec<UiMessage>,
    status: ChatStatus,
    last_error: Option<String>,
    // text part id -> part index in the trailing assistant turn
    open_text: HashMap<String, usize>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            status: ChatStatus::Ready,
            last_error: None,
            open_text: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.status(), ChatStatus::Submitted | ChatStatus::Streaming)
    }

    fn push_user(&mut self, text: &str) {
        self.messages.push(UiMessage::user(text));
        self.status = ChatStatus::Submitted;
        self.last_error = None;
    }

    fn drop_trailing_assistant(&mut self) {
        while matches!(self.messages.last(), Some(m) if m.role == Role::Assistant) {
            self.messages.pop();
        }
    }

    /// Called when a stream ends without a `finish` or `error` event
    /// (stop, disconnect). Partial content stays.
    fn interrupt(&mut self) {
        if self.is_busy() {
            self.status = ChatStatus::Ready;
        }
    }

    /// Fold one streamed event into the conversation.
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Start { message_id } => {
                self.messages.push(UiMessage::assistant(message_id));
                self.open_text.clear();
                self.status = ChatStatus::Streaming;
            }
            UiEvent::StartStep | UiEvent::FinishStep => {}
            UiEvent::TextStart { id } => {
                let message = self.trailing_assistant();
                message.parts.push(Part::text(""));
                let idx = message.parts.len() - 1;
                self.open_text.insert(id, idx);
            }
            UiEvent::TextDelta { id, delta } => {
                let idx = match self.open_text.get(&id) {
                    Some(idx) => *idx,
                    None => {
                        // Tolerate a missing text-start frame.
                        let message = self.trailing_assistant();
                        message.parts.push(Part::text(""));
                        let idx = message.parts.len() - 1;
                        self.open_text.insert(id, idx);
                        idx
                    }
                };
                if let Some(Part::Text { text }) = self.trailing_assistant().parts.get_mut(idx) {
                    text.push_str(&delta);
                }
            }
            UiEvent::TextEnd { id } => {
                self.open_text.remove(&id);
            }
            UiEvent::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                let part = if tool_name == IMAGE_TOOL_NAME {
                    Part::GenerateImage(ToolInvocation::started(tool_call_id))
                } else {
                    Part::Opaque(json!({
                        "type": format!("tool-{tool_name}"),
                        "toolCallId": tool_call_id,
                        "state": "input-streaming",
                    }))
                };
                self.trailing_assistant().parts.push(part);
            }
            // Partial argument text has no rendered form.
            UiEvent::ToolInputDelta { .. } => {}
            UiEvent::ToolInputAvailable {
                tool_call_id, input, ..
            } => {
                if let Some(call) = self.find_call(&tool_call_id) {
                    call.state = ToolCallState::InputAvailable;
                    call.input = Some(input);
                } else {
                    self.patch_dynamic_call(
                        &tool_call_id,
                        json!({"state": "input-available", "input": input}),
                    );
                }
            }
            UiEvent::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                if let Some(call) = self.find_call(&tool_call_id) {
                    call.state = ToolCallState::OutputAvailable;
                    call.output = Some(output);
                } else {
                    self.patch_dynamic_call(
                        &tool_call_id,
                        json!({"state": "output-available", "output": output}),
                    );
                }
            }
            UiEvent::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                if let Some(call) = self.find_call(&tool_call_id) {
                    call.state = ToolCallState::OutputError;
                    call.error_text = Some(error_text);
                } else {
                    self.patch_dynamic_call(
                        &tool_call_id,
                        json!({"state": "output-error", "errorText": error_text}),
                    );
                }
            }
            UiEvent::Finish => {
                self.open_text.clear();
                self.status = ChatStatus::Ready;
            }
            UiEvent::Error { error_text } => {
                self.last_error = Some(error_text);
                self.status = ChatStatus::Error;
            }
        }
    }

    fn trailing_assistant(&mut self) -> &mut UiMessage {
        if !matches!(self.messages.last(), Some(m) if m.role == Role::Assistant) {
            self.messages.push(UiMessage::assistant(""));
        }
        let idx = self.messages.len() - 1;
        &mut self.messages[idx]
    }

    fn find_call(&mut self, call_id: &str) -> Option<&mut ToolInvocation> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)?
            .parts
            .iter_mut()
            .find_map(|part| match part {
                Part::GenerateImage(call) if call.tool_call_id == call_id => Some(call),
                _ => None,
            })
    }

    /// Merge keys into an opaque tool part with a matching call id.
    fn patch_dynamic_call(&mut self, call_id: &str, patch: Value) {
        let Some(message) = self
            .messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
        else {
            return;
        };
        for part in &mut message.parts {
            if let Part::Opaque(Value::Object(obj)) = part {
                if obj.get("toolCallId").and_then(Value::as_str) == Some(call_id) {
                    if let Value::Object(fields) = patch {
                        obj.extend(fields);
                    }
                    return;
                }
            }
        }
    }
}

/// Chat client state: conversation plus the HTTP plumbing for one relay
/// endpoint. One request runs at a time.
pub struct ChatClient {
    http: HttpClient,
    endpoint: String,
    credentials: CredentialStore,
    conversation: Conversation,
    cancel: CancellationToken,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>, credentials: CredentialStore) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint: endpoint.into(),
            credentials,
            conversation: Conversation::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Submit a user turn. Returns the event stream for this response, or
    /// `None` while a previous response is still in flight.
    pub fn send(&mut self, text: &str) -> Option<mpsc::Receiver<UiEvent>> {
        if self.conversation.is_busy() {
            return None;
        }
        self.conversation.push_user(text);
        Some(self.start_request())
    }

    /// Drop the trailing assistant turn and request a fresh response to
    /// the same conversation.
    pub fn regenerate(&mut self) -> Option<mpsc::Receiver<UiEvent>> {
        if self.conversation.is_busy() {
            return None;
        }
        self.conversation.drop_trailing_assistant();
        if self.conversation.messages.is_empty() {
            return None;
        }
        self.conversation.status = ChatStatus::Submitted;
        self.conversation.last_error = None;
        Some(self.start_request())
    }

    fn start_request(&mut self) -> mpsc::Receiver<UiEvent> {
        let (gateway_key, openai_key) = self.credentials.load();
        let payload = stream::ChatPayload {
            messages: self.conversation.messages.clone(),
            api_key: Some(gateway_key).filter(|k| !k.is_empty()),
            openai_api_key: Some(openai_key).filter(|k| !k.is_empty()),
        };
        self.cancel = CancellationToken::new();
        stream::spawn_stream(
            self.http.clone(),
            self.endpoint.clone(),
            payload,
            self.cancel.clone(),
        )
    }

    /// Abort the in-flight response. Partial content stays in place.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.conversation.interrupt();
    }

    pub fn apply(&mut self, event: UiEvent) {
        self.conversation.apply(event);
    }

    /// Settle the state machine after the event stream closes.
    pub fn settle(&mut self) {
        self.conversation.interrupt();
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.conversation = Conversation::new();
    }

    pub fn credentials(&mut self) -> &mut CredentialStore {
        &mut self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn streamed_text_turn(conversation: &mut Conversation) {
        conversation.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        conversation.apply(UiEvent::StartStep);
        conversation.apply(UiEvent::TextStart { id: "t1".into() });
        conversation.apply(UiEvent::TextDelta {
            id: "t1".into(),
            delta: "Hello".into(),
        });
        conversation.apply(UiEvent::TextDelta {
            id: "t1".into(),
            delta: " world".into(),
        });
        conversation.apply(UiEvent::TextEnd { id: "t1".into() });
        conversation.apply(UiEvent::FinishStep);
        conversation.apply(UiEvent::Finish);
    }

    #[test]
    fn text_deltas_accumulate_into_one_part() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        streamed_text_turn(&mut conversation);

        assert_eq!(conversation.status(), ChatStatus::Ready);
        let assistant = conversation.messages().last().unwrap();
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.parts, vec![Part::text("Hello world")]);
    }

    #[test]
    fn image_call_walks_through_its_states() {
        let mut conversation = Conversation::new();
        conversation.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        conversation.apply(UiEvent::ToolInputStart {
            tool_call_id: "call_1".into(),
            tool_name: IMAGE_TOOL_NAME.into(),
        });

        let call = conversation.find_call("call_1").unwrap();
        assert_eq!(call.state, ToolCallState::InputStreaming);

        conversation.apply(UiEvent::ToolInputAvailable {
            tool_call_id: "call_1".into(),
            tool_name: IMAGE_TOOL_NAME.into(),
            input: json!({"prompt": "a cat"}),
        });
        conversation.apply(UiEvent::ToolOutputAvailable {
            tool_call_id: "call_1".into(),
            output: json!({"image": "aGk=", "prompt": "a cat"}),
        });

        let call = conversation.find_call("call_1").unwrap();
        assert_eq!(call.state, ToolCallState::OutputAvailable);
        assert_eq!(call.input, Some(json!({"prompt": "a cat"})));
        assert_eq!(
            call.output.as_ref().and_then(|o| o.get("image")),
            Some(&json!("aGk="))
        );
    }

    #[test]
    fn failed_image_call_lands_in_output_error() {
        let mut conversation = Conversation::new();
        conversation.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        conversation.apply(UiEvent::ToolInputStart {
            tool_call_id: "call_1".into(),
            tool_name: IMAGE_TOOL_NAME.into(),
        });
        conversation.apply(UiEvent::ToolOutputError {
            tool_call_id: "call_1".into(),
            error_text: "image backend error 500".into(),
        });
        conversation.apply(UiEvent::Finish);

        let call = conversation.find_call("call_1").unwrap();
        assert_eq!(call.state, ToolCallState::OutputError);
        assert_eq!(call.error_text.as_deref(), Some("image backend error 500"));
        assert_eq!(conversation.status(), ChatStatus::Ready);
    }

    #[test]
    fn unknown_tool_events_update_an_opaque_part() {
        let mut conversation = Conversation::new();
        conversation.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        conversation.apply(UiEvent::ToolInputStart {
            tool_call_id: "call_9".into(),
            tool_name: "webSearch".into(),
        });
        conversation.apply(UiEvent::ToolOutputAvailable {
            tool_call_id: "call_9".into(),
            output: json!({"hits": 3}),
        });

        let assistant = conversation.messages().last().unwrap();
        let Part::Opaque(value) = &assistant.parts[0] else {
            panic!("expected opaque part, got {:?}", assistant.parts[0]);
        };
        assert_eq!(value["type"], "tool-webSearch");
        assert_eq!(value["state"], "output-available");
        assert_eq!(value["output"], json!({"hits": 3}));
    }

    #[test]
    fn error_event_keeps_partial_content() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        conversation.apply(UiEvent::TextDelta {
            id: "t1".into(),
            delta: "partial".into(),
        });
        conversation.apply(UiEvent::Error {
            error_text: "gateway error 500".into(),
        });

        assert_eq!(conversation.status(), ChatStatus::Error);
        assert_eq!(conversation.last_error(), Some("gateway error 500"));
        let assistant = conversation.messages().last().unwrap();
        assert_eq!(assistant.parts, vec![Part::text("partial")]);
    }

    #[test]
    fn interrupt_settles_back_to_ready() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        assert!(conversation.is_busy());

        conversation.interrupt();
        assert_eq!(conversation.status(), ChatStatus::Ready);

        // An errored conversation is not busy and stays errored.
        conversation.apply(UiEvent::Error {
            error_text: "boom".into(),
        });
        conversation.interrupt();
        assert_eq!(conversation.status(), ChatStatus::Error);
    }

    fn test_client() -> ChatClient {
        let dir = std::env::temp_dir().join("atelier-client-test");
        let credentials = CredentialStore::new(
            dir.join("session.toml"),
            dir.join("local.toml"),
        );
        // Nothing listens on port 9; requests fail fast and the test
        // never consumes the events.
        ChatClient::new("http://127.0.0.1:9/api/chat", credentials)
    }

    #[tokio::test]
    async fn send_while_busy_is_a_no_op() {
        let mut client = test_client();

        let rx = client.send("first");
        assert!(rx.is_some());
        assert_eq!(client.conversation().status(), ChatStatus::Submitted);

        assert!(client.send("second").is_none());
        assert_eq!(client.conversation().messages().len(), 1);
    }

    #[tokio::test]
    async fn regenerate_drops_the_trailing_assistant_turn() {
        let mut client = test_client();
        let _rx = client.send("hi");
        streamed_text_turn(&mut client.conversation);
        assert_eq!(client.conversation().messages().len(), 2);

        let rx = client.regenerate();
        assert!(rx.is_some());

        let messages = client.conversation().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(client.conversation().status(), ChatStatus::Submitted);
    }

    #[tokio::test]
    async fn regenerate_on_an_empty_conversation_is_a_no_op() {
        let mut client = test_client();
        assert!(client.regenerate().is_none());
        assert_eq!(client.conversation().status(), ChatStatus::Ready);
    }

    #[tokio::test]
    async fn stop_returns_to_ready_and_allows_resubmit() {
        let mut client = test_client();
        let _rx = client.send("hi");
        client.apply(UiEvent::Start {
            message_id: "msg_1".into(),
        });
        assert_eq!(client.conversation().status(), ChatStatus::Streaming);

        client.stop();
        assert_eq!(client.conversation().status(), ChatStatus::Ready);
        assert!(client.send("again").is_some());
    }
}
