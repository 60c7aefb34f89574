//! HTTP side of the chat client.
//!
//! Posts the conversation to the relay and decodes the SSE response back
//! into [`UiEvent`]s on a channel. The request runs in a spawned task under
//! a cancellation token; dropping the receiver also tears the request down.

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::SseDecoder;
use crate::message::{UiEvent, UiMessage};

/// Request body for the relay. Keys are attached only when present so the
/// relay falls back to its own configuration.
#[derive(Debug, Serialize)]
pub(crate) struct ChatPayload {
    pub messages: Vec<UiMessage>,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "openaiApiKey", skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

pub(crate) fn spawn_stream(
    http: reqwest::Client,
    endpoint: String,
    payload: ChatPayload,
    cancel: CancellationToken,
) -> mpsc::Receiver<UiEvent> {
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        tokio::select! {
            _ = run_stream(http, endpoint, payload, tx) => {}
            _ = cancel.cancelled() => {}
        }
    });

    rx
}

async fn run_stream(
    http: reqwest::Client,
    endpoint: String,
    payload: ChatPayload,
    tx: mpsc::Sender<UiEvent>,
) {
    let response = match http.post(&endpoint).json(&payload).send().await {
        Ok(response) => response,
        Err(e) => {
            fail(&tx, format!("request failed: {}", e)).await;
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("(failed to read body: {})", e));
        fail(&tx, format!("relay error {}: {}", status, body)).await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                fail(&tx, format!("stream interrupted: {}", e)).await;
                return;
            }
        };

        for frame in decoder.push(&chunk) {
            if frame.is_done() {
                return;
            }
            match frame.try_parse::<UiEvent>() {
                Some(event) => {
                    // Receiver dropped means the user stopped the turn.
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                None => debug!("skipping unrecognized frame: {}", frame.preview()),
            }
        }
    }
}

async fn fail(tx: &mpsc::Sender<UiEvent>, error_text: String) {
    let _ = tx.send(UiEvent::Error { error_text }).await;
}
