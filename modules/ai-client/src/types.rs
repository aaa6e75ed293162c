//! Shared types for the unified language-model contract.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// =============================================================================
// Tools & media
// =============================================================================

/// Vendor-neutral function descriptor; each client maps it to its own wire
/// shape (`input_schema` for Anthropic, `function.parameters` for OpenAI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct MediaInput {
    pub content: Vec<u8>,
    pub mime_type: String,
}

/// MIME types accepted by vision-capable providers; everything else is
/// dropped with a warning before the request is built.
pub const ALLOWED_IMAGE_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

// =============================================================================
// Generation request
// =============================================================================

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    /// JSON schema for structured output.
    pub response_format: Option<Value>,
    pub tools: Vec<ToolDefinition>,
    pub thinking_enabled: bool,
    pub thinking_budget_tokens: u32,
    pub media: Vec<MediaInput>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            response_format: None,
            tools: Vec::new(),
            thinking_enabled: false,
            thinking_budget_tokens: 2000,
            media: Vec::new(),
            max_tokens: 4096,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }

    pub fn response_format(mut self, schema: Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn thinking(mut self, enabled: bool) -> Self {
        self.thinking_enabled = enabled;
        self
    }

    pub fn thinking_budget(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget_tokens = budget_tokens;
        self
    }

    pub fn media(mut self, media: Vec<MediaInput>) -> Self {
        self.media = media;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

// =============================================================================
// Model info
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub supports_structured_output: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_thinking: bool,
    pub supports_multimodal: bool,
    pub max_tokens: Option<u32>,
    pub context_length: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StructuredOutput,
    Tools,
    Streaming,
    Thinking,
    Multimodal,
}

impl ModelInfo {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::StructuredOutput => self.supports_structured_output,
            Capability::Tools => self.supports_tools,
            Capability::Streaming => self.supports_streaming,
            Capability::Thinking => self.supports_thinking,
            Capability::Multimodal => self.supports_multimodal,
        }
    }
}

// =============================================================================
// Generation response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
}

/// History entry for one tool call within a generation turn. `result` and
/// `structured_content` carry the frontend stream; the string or blocks fed
/// back to the model are internal to the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Standardized response snapshot. Streaming yields a sequence of these,
/// each a cumulative view of the turn so far; non-streaming returns the
/// final one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub model_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolUse>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_executions: Vec<ToolExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationResponse> + Send>>;

// =============================================================================
// Tool executor
// =============================================================================

/// Host-side tool implementation invoked by the tool-use loop.
///
/// A returned `Err` or an `Ok` value containing a truthy `"error"` key both
/// mark the execution failed; the loop feeds the error back to the model
/// and continues.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}

// =============================================================================
// Provider trait
// =============================================================================

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Dynamically discover available models with their capabilities.
    async fn discover_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    fn get_model_info(&self, model_name: &str) -> Option<ModelInfo>;

    /// Generate a response, driving the tool-use loop when `tool_executor`
    /// and tools are supplied. Capability flags on [`ModelInfo`] are honored
    /// strictly: requesting an unsupported feature is an error, never a
    /// silent downgrade.
    async fn generate(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> anyhow::Result<GenerationResponse>;

    /// Streaming variant: a lazy sequence of cumulative snapshots,
    /// including tool-execution status changes.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> anyhow::Result<GenerationStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new("claude-sonnet-4-5", vec![ChatMessage::user("hi")]);
        assert_eq!(request.max_tokens, 4096);
        assert_eq!(request.thinking_budget_tokens, 2000);
        assert!(!request.thinking_enabled);
        assert!(request.response_format.is_none());
    }

    #[test]
    fn test_capability_lookup() {
        let info = ModelInfo {
            name: "m".into(),
            provider: "p".into(),
            supports_structured_output: true,
            supports_tools: false,
            supports_streaming: true,
            supports_thinking: false,
            supports_multimodal: false,
            max_tokens: None,
            context_length: None,
            description: None,
        };
        assert!(info.supports(Capability::StructuredOutput));
        assert!(!info.supports(Capability::Tools));
    }
}
