//! Tools the relay advertises to the model.
//!
//! Tools are built per request because they bind per-request credentials.
//! There is exactly one today (`generateImage`); the registry keeps the
//! loop code indifferent to that.

mod image;

pub use image::ImageTool;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::provider::ToolDefinition;

/// A tool the model can call during a chat turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the tool's input.
    fn parameters(&self) -> Value;
    /// Run the tool once. No retries; errors surface to the caller as-is.
    async fn execute(&self, input: Value) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().into(),
            description: self.description().into(),
            parameters: self.parameters(),
        }
    }
}

/// The tools available to one relay request.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(input).await,
            None => anyhow::bail!("unknown tool: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_tool() -> Arc<dyn Tool> {
        Arc::new(ImageTool::new(
            reqwest::Client::new(),
            "http://localhost:0",
            "test-key",
            "dall-e-3",
        ))
    }

    #[test]
    fn definitions_cover_registered_tools() {
        let mut tools = ToolSet::new();
        tools.register(image_tool());

        let defs = tools.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "generateImage");
        assert_eq!(defs[0].description, "Generate an image");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let tools = ToolSet::new();
        let err = tools.execute("webSearch", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }
}
