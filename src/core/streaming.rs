//! Incremental decoder for `text/event-stream` payloads.
//!
//! Shared by the gateway provider client (upstream completions stream) and
//! the terminal client (relay event stream). Handles partial chunks, keeps
//! the buffer bounded, and surfaces the `[DONE]` sentinel.

use anyhow::Result;
use serde::de::DeserializeOwned;

/// SSE stream decoder with buffering.
///
/// Feed raw chunks with [`push`](Self::push); complete `data:` frames come
/// back in order, anything incomplete stays buffered for the next chunk.
/// Non-data lines (comments, `event:`, `id:`) are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Buffer cap. A malformed stream without newlines gets truncated
    /// rather than growing without bound.
    const BUFFER_CAP: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Push a chunk of bytes and extract the complete SSE frames it yields.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        if self.buffer.len() > Self::BUFFER_CAP {
            tracing::warn!(
                "sse buffer exceeded {}KB, dropping oldest data",
                Self::BUFFER_CAP / 1024
            );
            let mut cut = self.buffer.len() - Self::BUFFER_CAP / 2;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }

        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            // "data:" with or without the optional leading space
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                frames.push(SseFrame {
                    data: data.to_string(),
                });
            }
        }

        frames
    }

    /// Push pre-decoded text (tests, line-based transports).
    pub fn push_str(&mut self, s: &str) -> Vec<SseFrame> {
        self.push(s.as_bytes())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// True if a partial line is still buffered.
    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// One complete `data:` frame, prefix stripped.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    /// The `[DONE]` end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Parse the frame payload as JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data)
            .map_err(|e| anyhow::anyhow!("sse json parse error: {}. Data: {}", e, self.preview()))
    }

    /// Parse the frame payload as JSON, `None` on failure.
    pub fn try_parse<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.data).ok()
    }

    /// First 200 chars of the payload, for error messages.
    pub fn preview(&self) -> String {
        match self.data.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &self.data[..idx]),
            None => self.data.clone(),
        }
    }
}
