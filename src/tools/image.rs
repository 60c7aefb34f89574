//! Image generation tool (`generateImage`).
//!
//! Single-shot adapter over the image backend's `/images/generations`
//! endpoint. Asks for base64 payloads so the result can be inlined into the
//! tool output as `{image, prompt}`. Failures propagate to the caller,
//! which reports them as a failed tool call; nothing is retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::Tool;
use crate::message::IMAGE_TOOL_NAME;

pub struct ImageTool {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ImageTool {
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

    async fn generate(&self, prompt: &str) -> Result<Value> {
        if self.api_key.is_empty() {
            anyhow::bail!("no API key configured for the image backend");
        }

        info!("generating image, model={}", self.model);

        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
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
            anyhow::bail!("image backend error {}: {}", status, text);
        }

        let result: ImagesResponse = response
            .json()
            .await
            .context("invalid image backend response")?;
        let image = result
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| anyhow::anyhow!("image backend returned no image data"))?;

        Ok(json!({ "image": image, "prompt": prompt }))
    }
}

#[async_trait]
impl Tool for ImageTool {
    fn name(&self) -> &str {
        IMAGE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Generate an image"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The prompt to generate the image from",
                }
            },
            "required": ["prompt"],
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let input: ImageInput =
            serde_json::from_value(input).context("invalid generateImage input")?;
        self.generate(&input.prompt).await
    }
}

#[derive(Debug, Deserialize)]
struct ImageInput {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}
