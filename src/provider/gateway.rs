//! Streaming client for the model gateway.
//!
//! Speaks the OpenAI-compatible Chat Completions API with `stream: true`
//! and decodes the SSE response into [`StreamEvent`]s. Tool-call argument
//! deltas arrive interleaved and keyed by index; they are accumulated here
//! so the orchestration loop only sees whole calls.

use std::collections::BTreeMap;

use anyhow::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ModelMessage, StreamEvent, ToolDefinition};
use crate::core::SseDecoder;

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GatewayClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Open a streaming completion. Returns a channel of decoded events;
    /// the channel always terminates with [`StreamEvent::Done`].
    pub async fn create_stream(
        &self,
        messages: Vec<ModelMessage>,
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ChatTool::from_definition).collect())
            },
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("(failed to read body: {})", e));
            anyhow::bail!("gateway error {}: {}", status, text);
        }

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(Self::process_sse_stream(response, tx));

        Ok(rx)
    }

    /// Decode the SSE body and forward events until the stream closes.
    async fn process_sse_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
        struct InFlightCall {
            id: String,
            name: String,
            args: String,
            started: bool,
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        // Keyed by tool_call index; BTreeMap keeps completion order stable.
        let mut tool_calls: BTreeMap<usize, InFlightCall> = BTreeMap::new();

        while let Some(chunk) = stream.next().await {
            // Consumer gone: stop draining and drop the upstream connection.
            if tx.is_closed() {
                return;
            }

            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    break;
                }
            };

            for frame in decoder.push(&chunk) {
                if frame.is_done() {
                    continue;
                }

                let chunk_data: ChatStreamChunk = match frame.try_parse() {
                    Some(c) => c,
                    None => continue,
                };

                for choice in chunk_data.choices {
                    let delta = choice.delta;

                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            let _ = tx.send(StreamEvent::TextDelta(content)).await;
                        }
                    }

                    if let Some(delta_tool_calls) = delta.tool_calls {
                        for tc in delta_tool_calls {
                            let call =
                                tool_calls.entry(tc.index).or_insert_with(|| InFlightCall {
                                    id: String::new(),
                                    name: String::new(),
                                    args: String::new(),
                                    started: false,
                                });

                            if let Some(ref id) = tc.id {
                                call.id = id.clone();
                            }
                            if let Some(ref func) = tc.function {
                                if let Some(ref name) = func.name {
                                    call.name = name.clone();
                                }
                            }

                            if !call.started && !call.id.is_empty() && !call.name.is_empty() {
                                call.started = true;
                                let _ = tx
                                    .send(StreamEvent::ToolCallStart {
                                        call_id: call.id.clone(),
                                        name: call.name.clone(),
                                    })
                                    .await;
                            }

                            if let Some(func) = tc.function {
                                if let Some(args) = func.arguments {
                                    if !args.is_empty() {
                                        call.args.push_str(&args);
                                        if call.started {
                                            let _ = tx
                                                .send(StreamEvent::ToolCallDelta {
                                                    call_id: call.id.clone(),
                                                    arguments_delta: args,
                                                })
                                                .await;
                                        }
                                    }
                                }
                            }
                        }
                    }

                    if choice.finish_reason.is_some() {
                        while let Some((_, call)) = tool_calls.pop_first() {
                            if call.started {
                                let _ = tx
                                    .send(StreamEvent::ToolCallEnd {
                                        call_id: call.id,
                                        name: call.name,
                                        arguments: call.args,
                                    })
                                    .await;
                            }
                        }
                    }
                }

                if let Some(usage) = chunk_data.usage {
                    let _ = tx
                        .send(StreamEvent::Usage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                        })
                        .await;
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
    }
}

// Request/response wire types (OpenAI-compatible Chat Completions format)

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ModelMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

impl ChatTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".into(),
            function: ChatFunction {
                name: def.name.clone(),
                description: Some(def.description.clone()),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatStreamUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<ChatStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
