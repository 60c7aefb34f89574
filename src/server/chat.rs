//! POST /api/chat handler and the tool-step loop.
//!
//! The handler spawns one processing task per request and bridges its event
//! channel to the SSE response. The task sanitizes the conversation, opens
//! a streaming completion against the gateway, executes requested tools,
//! and emits the UI-message event lifecycle. The whole task runs under the
//! configured execution budget; on expiry the stream reports an error and
//! terminates instead of hanging.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::message::{UiEvent, UiMessage, sanitize_messages};
use crate::provider::{
    GatewayClient, ModelMessage, ModelToolCall, StreamEvent, to_model_messages,
};
use crate::tools::{ImageTool, ToolSet};

/// Fixed instruction sent ahead of every conversation.
const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that can answer questions and help with tasks";

/// Request body. Credentials ride along per request; absent or empty ones
/// fall back to the process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<UiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

/// Streaming chat endpoint - returns the UI-message event stream.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<UiEvent>(100);

    let budget = Duration::from_secs(state.config.stream_timeout_secs);
    tokio::spawn(async move {
        if tokio::time::timeout(budget, process_chat(state, req, tx.clone()))
            .await
            .is_err()
        {
            warn!("chat stream exceeded its {}s budget", budget.as_secs());
            let _ = tx
                .send(UiEvent::Error {
                    error_text: format!(
                        "stream exceeded the {}s execution budget",
                        budget.as_secs()
                    ),
                })
                .await;
        }
    });

    // Bridge the channel to SSE; the [DONE] frame marks the end once the
    // processing task drops its sender.
    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Process one chat request and send events to the channel.
async fn process_chat(state: AppState, req: ChatRequest, tx: mpsc::Sender<UiEvent>) {
    let config = &state.config;

    let gateway_key = req
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| config.gateway_api_key.clone())
        .unwrap_or_default();
    let openai_key = req
        .openai_api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| config.openai_api_key.clone())
        .unwrap_or_default();

    let gateway = GatewayClient::new(
        state.http.clone(),
        &config.gateway_base_url,
        gateway_key,
        &config.model,
    );

    let mut tools = ToolSet::new();
    tools.register(Arc::new(ImageTool::new(
        state.http.clone(),
        &config.openai_base_url,
        openai_key,
        &config.image_model,
    )));

    let sanitized = sanitize_messages(&req.messages);
    let mut messages = to_model_messages(SYSTEM_PROMPT, &sanitized);

    info!(
        "chat request: {} turns, model={}",
        req.messages.len(),
        gateway.model()
    );

    let _ = tx
        .send(UiEvent::Start {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
        })
        .await;

    run_steps(&gateway, &tools, &mut messages, &tx, config.max_steps).await;
}

/// Drive up to `max_steps` model invocations, executing tools between them.
async fn run_steps(
    gateway: &GatewayClient,
    tools: &ToolSet,
    messages: &mut Vec<ModelMessage>,
    tx: &mpsc::Sender<UiEvent>,
    max_steps: usize,
) {
    let max_steps = max_steps.max(1);
    let definitions = tools.definitions();

    for step in 0..max_steps {
        let _ = tx.send(UiEvent::StartStep).await;

        let mut rx = match gateway.create_stream(messages.clone(), &definitions).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("gateway call failed: {:#}", e);
                let _ = tx
                    .send(UiEvent::Error {
                        error_text: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut text_id: Option<String> = None;
        let mut step_text = String::new();
        let mut completed_calls: Vec<CompletedCall> = Vec::new();
        let mut stream_failed = false;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta(delta) => {
                    let id = match &text_id {
                        Some(id) => id.clone(),
                        None => {
                            let id = format!("txt_{}", Uuid::new_v4().simple());
                            text_id = Some(id.clone());
                            let _ = tx.send(UiEvent::TextStart { id: id.clone() }).await;
                            id
                        }
                    };
                    step_text.push_str(&delta);
                    if tx.send(UiEvent::TextDelta { id, delta }).await.is_err() {
                        return; // client gone
                    }
                }
                StreamEvent::ToolCallStart { call_id, name } => {
                    let _ = tx
                        .send(UiEvent::ToolInputStart {
                            tool_call_id: call_id,
                            tool_name: name,
                        })
                        .await;
                }
                StreamEvent::ToolCallDelta {
                    call_id,
                    arguments_delta,
                } => {
                    let _ = tx
                        .send(UiEvent::ToolInputDelta {
                            tool_call_id: call_id,
                            input_text_delta: arguments_delta,
                        })
                        .await;
                }
                StreamEvent::ToolCallEnd {
                    call_id,
                    name,
                    arguments,
                } => {
                    completed_calls.push(CompletedCall {
                        call_id,
                        name,
                        arguments,
                    });
                }
                StreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    debug!("usage: {} in, {} out", input_tokens, output_tokens);
                }
                StreamEvent::Error(message) => {
                    warn!("gateway stream error: {}", message);
                    let _ = tx.send(UiEvent::Error { error_text: message }).await;
                    stream_failed = true;
                }
                StreamEvent::Done => break,
            }
        }

        if let Some(id) = text_id.take() {
            let _ = tx.send(UiEvent::TextEnd { id }).await;
        }

        // Transparent conduit: an upstream failure ends the stream, nothing
        // is retried or masked.
        if stream_failed {
            return;
        }

        if completed_calls.is_empty() {
            let _ = tx.send(UiEvent::FinishStep).await;
            break;
        }

        debug!("step {}: {} tool calls", step + 1, completed_calls.len());

        if tx.is_closed() {
            return;
        }

        // Replay structure for a continuation call: the assistant message
        // announcing the calls, then one tool message per result.
        let mut assistant_calls = Vec::new();
        let mut result_messages = Vec::new();

        for call in completed_calls {
            let input: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);

            let _ = tx
                .send(UiEvent::ToolInputAvailable {
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.name.clone(),
                    input: input.clone(),
                })
                .await;

            assistant_calls.push(ModelToolCall::function(
                &call.call_id,
                &call.name,
                call.arguments.clone(),
            ));

            match tools.execute(&call.name, input).await {
                Ok(output) => {
                    let content = match &output {
                        Value::String(s) => s.clone(),
                        v => v.to_string(),
                    };
                    let _ = tx
                        .send(UiEvent::ToolOutputAvailable {
                            tool_call_id: call.call_id.clone(),
                            output,
                        })
                        .await;
                    result_messages.push(ModelMessage::tool_result(&call.call_id, content));
                }
                Err(e) => {
                    let text = format!("{:#}", e);
                    warn!("tool {} failed: {}", call.name, text);
                    let _ = tx
                        .send(UiEvent::ToolOutputError {
                            tool_call_id: call.call_id.clone(),
                            error_text: text.clone(),
                        })
                        .await;
                    result_messages.push(ModelMessage::tool_result(&call.call_id, text));
                }
            }
        }

        let step_content = (!step_text.is_empty()).then_some(step_text);
        messages.push(ModelMessage::assistant_calls(step_content, assistant_calls));
        messages.append(&mut result_messages);

        let _ = tx.send(UiEvent::FinishStep).await;
    }

    let _ = tx.send(UiEvent::Finish).await;
}

struct CompletedCall {
    call_id: String,
    name: String,
    arguments: String,
}
