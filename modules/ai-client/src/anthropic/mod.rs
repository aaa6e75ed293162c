//! Anthropic (Claude) provider.
//!
//! Anthropic has no native JSON mode, so structured output is enforced by
//! injecting a synthetic `extract` tool whose parameters equal the
//! requested schema and forcing tool choice to it; the tool's arguments
//! become the final `content`. Extended thinking and the interleaved
//! thinking beta are supported for models that carry the capability flag.

mod client;
mod wire;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use tracing::{info, warn};

use crate::tool_loop::{
    self, ChatBackend, LoopMessage, ParsedTurn, StreamDelta, ThinkingBlock, ToolResultContent,
};
use crate::types::{
    Capability, GenerationRequest, GenerationResponse, GenerationStream, LanguageModelProvider,
    MediaInput, ModelInfo, Role, ToolExecutor, ToolUse, Usage, ALLOWED_IMAGE_TYPES,
};

use client::AnthropicClient;
use wire::{
    ChatRequest, ChatResponse, ContentBlock, ImageSource, ThinkingConfig, ToolDefinitionWire,
    WireMessage,
};

const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";
const EXTRACT_TOOL_NAME: &str = "extract";

pub struct AnthropicProvider {
    client: Arc<AnthropicClient>,
    model_cache: RwLock<HashMap<String, ModelInfo>>,
}

impl AnthropicProvider {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Arc::new(AnthropicClient::new(api_key)),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Arc::new(AnthropicClient::new(api_key).with_base_url(base_url)),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    fn catalog() -> Vec<ModelInfo> {
        let entry = |name: &str, thinking: bool, description: &str| ModelInfo {
            name: name.to_string(),
            provider: "anthropic".to_string(),
            supports_structured_output: true,
            supports_tools: true,
            supports_streaming: true,
            supports_thinking: thinking,
            supports_multimodal: true,
            max_tokens: None,
            context_length: Some(200_000),
            description: Some(description.to_string()),
        };
        vec![
            entry(
                "claude-3-5-sonnet-latest",
                false,
                "Claude 3.5 Sonnet - balanced performance",
            ),
            entry(
                "claude-sonnet-4-20250514",
                true,
                "Claude Sonnet 4 - enhanced reasoning",
            ),
            entry(
                "claude-sonnet-4-5",
                true,
                "Claude Sonnet 4.5 - latest generation",
            ),
        ]
    }

    async fn require_model(&self, model_name: &str) -> Result<ModelInfo> {
        let cache_empty = self.model_cache.read().expect("model cache poisoned").is_empty();
        if cache_empty {
            self.discover_models().await?;
        }
        self.get_model_info(model_name)
            .ok_or_else(|| anyhow!("Model '{model_name}' not found in provider anthropic"))
    }

    fn check_capabilities(&self, info: &ModelInfo, request: &GenerationRequest) -> Result<()> {
        if request.response_format.is_some() && !info.supports(Capability::StructuredOutput) {
            return Err(anyhow!(
                "Model '{}' does not support structured output",
                info.name
            ));
        }
        if !request.tools.is_empty() && !info.supports(Capability::Tools) {
            return Err(anyhow!("Model '{}' does not support tools", info.name));
        }
        if request.thinking_enabled && !info.supports(Capability::Thinking) {
            return Err(anyhow!("Model '{}' does not support thinking", info.name));
        }
        if !request.media.is_empty() && !info.supports(Capability::Multimodal) {
            return Err(anyhow!(
                "Model '{}' does not support multimodal inputs",
                info.name
            ));
        }
        Ok(())
    }

    /// Build the base wire request: system messages merged into the system
    /// parameter, media attached to the last user message, thinking and
    /// structured-output handling applied.
    fn build_request(&self, request: &GenerationRequest, info: &ModelInfo) -> ChatRequest {
        let mut wire = ChatRequest::new(&request.model);
        wire.max_tokens = request.max_tokens;
        // Anthropic caps temperature at 1.0.
        wire.temperature = request.temperature.map(|t| t.min(1.0));
        wire.top_p = request.top_p;
        wire.stop_sequences = request.stop_sequences.clone();

        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<WireMessage> = Vec::new();

        let last_user_idx = request
            .messages
            .iter()
            .rposition(|m| matches!(m.role, Role::User));

        for (idx, msg) in request.messages.iter().enumerate() {
            if msg.content.trim().is_empty() {
                warn!(role = ?msg.role, "skipping message with empty content");
                continue;
            }
            match msg.role {
                Role::System => system_parts.push(msg.content.clone()),
                Role::User => {
                    if Some(idx) == last_user_idx && !request.media.is_empty() {
                        messages.push(WireMessage::user_blocks(content_with_media(
                            &msg.content,
                            &request.media,
                        )));
                    } else {
                        messages.push(WireMessage::user(&msg.content));
                    }
                }
                Role::Assistant => messages.push(WireMessage::assistant(&msg.content)),
                Role::Tool => {
                    warn!("tool-role messages are produced by the loop; skipping")
                }
            }
        }

        if !system_parts.is_empty() {
            wire.system = Some(system_parts.join("\n\n"));
        }
        wire.messages = messages;

        for tool in &request.tools {
            wire = wire.tool(ToolDefinitionWire {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            });
        }

        if request.thinking_enabled && info.supports_thinking {
            wire.thinking = Some(ThinkingConfig::enabled(request.thinking_budget_tokens));
            info!(model = %request.model, "extended thinking enabled");
        }

        // Structured output via forced synthetic tool, only when the caller
        // did not bring tools of their own.
        if let Some(ref schema) = request.response_format {
            if request.tools.is_empty() {
                wire = wire.tool(ToolDefinitionWire {
                    name: EXTRACT_TOOL_NAME.to_string(),
                    description: "Extract structured data".to_string(),
                    input_schema: schema.clone(),
                });
                wire.tool_choice = serde_json::json!({
                    "type": "tool",
                    "name": EXTRACT_TOOL_NAME,
                })
                .into();
                info!("enforcing structured output via forced tool call");
            }
        }

        wire
    }
}

/// Images are placed before text in the content-block list. Unsupported
/// MIME types and empty payloads are dropped with a warning.
fn content_with_media(text: &str, media: &[MediaInput]) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for item in media {
        if !ALLOWED_IMAGE_TYPES.contains(&item.mime_type.as_str()) {
            warn!(mime_type = %item.mime_type, "unsupported image type, skipping");
            continue;
        }
        if item.content.is_empty() {
            warn!("image content is empty, skipping");
            continue;
        }
        let data = base64::engine::general_purpose::STANDARD.encode(&item.content);
        blocks.push(ContentBlock::Image {
            source: ImageSource::base64(item.mime_type.clone(), data),
        });
    }
    if !text.trim().is_empty() {
        blocks.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    blocks
}

fn parse_turn(response: ChatResponse) -> ParsedTurn {
    let mut turn = ParsedTurn {
        model: response.model.clone(),
        stop_reason: response.stop_reason.clone(),
        usage: response.usage.as_ref().map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
        ..Default::default()
    };
    for block in &response.content {
        match block {
            ContentBlock::Text { text } => turn.text.push_str(text),
            ContentBlock::Thinking {
                thinking,
                signature,
            } => turn.thinking.push(ThinkingBlock {
                thinking: thinking.clone(),
                signature: signature.clone(),
            }),
            ContentBlock::ToolUse { id, name, input } => turn.tool_uses.push(ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => {}
        }
    }
    turn.raw = serde_json::to_value(&response.content).ok();
    turn
}

fn loop_message_to_wire(message: &LoopMessage) -> WireMessage {
    match message {
        LoopMessage::Assistant {
            thinking,
            text,
            tool_uses,
        } => {
            let mut blocks = Vec::new();
            for t in thinking {
                blocks.push(ContentBlock::Thinking {
                    thinking: t.thinking.clone(),
                    signature: t.signature.clone(),
                });
            }
            if let Some(text) = text {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            for tu in tool_uses {
                blocks.push(ContentBlock::ToolUse {
                    id: tu.id.clone(),
                    name: tu.name.clone(),
                    input: tu.input.clone(),
                });
            }
            WireMessage::assistant_blocks(blocks)
        }
        LoopMessage::ToolResults(results) => {
            let blocks = results
                .iter()
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.tool_use_id.clone(),
                    content: match &r.content {
                        ToolResultContent::Text(s) => serde_json::Value::String(s.clone()),
                        ToolResultContent::Blocks(blocks) => {
                            serde_json::Value::Array(blocks.clone())
                        }
                    },
                    is_error: r.is_error.then_some(true),
                })
                .collect();
            WireMessage::user_blocks(blocks)
        }
    }
}

struct AnthropicBackend {
    client: Arc<AnthropicClient>,
    base: ChatRequest,
    beta: Option<String>,
}

impl AnthropicBackend {
    fn request_with(&self, appended: &[LoopMessage]) -> ChatRequest {
        let mut request = self.base.clone();
        request
            .messages
            .extend(appended.iter().map(loop_message_to_wire));
        request
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn model(&self) -> &str {
        &self.base.model
    }

    async fn chat(&self, appended: &[LoopMessage]) -> Result<ParsedTurn> {
        let request = self.request_with(appended);
        let response = self.client.chat(&request, self.beta.as_deref()).await?;
        Ok(parse_turn(response))
    }

    async fn chat_streamed(
        &self,
        appended: &[LoopMessage],
        deltas: tokio::sync::mpsc::UnboundedSender<StreamDelta>,
    ) -> Result<ParsedTurn> {
        let request = self.request_with(appended);
        let response = self
            .client
            .chat_streamed(&request, self.beta.as_deref(), deltas)
            .await?;
        Ok(parse_turn(response))
    }
}

#[async_trait]
impl LanguageModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn discover_models(&self) -> Result<Vec<ModelInfo>> {
        let models = Self::catalog();
        let mut cache = self.model_cache.write().expect("model cache poisoned");
        for model in &models {
            cache.insert(model.name.clone(), model.clone());
        }
        info!(count = models.len(), "discovered Anthropic models");
        Ok(models)
    }

    fn get_model_info(&self, model_name: &str) -> Option<ModelInfo> {
        self.model_cache
            .read()
            .expect("model cache poisoned")
            .get(model_name)
            .cloned()
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<GenerationResponse> {
        let info = self.require_model(&request.model).await?;
        self.check_capabilities(&info, &request)?;

        let structured = request.response_format.is_some() && request.tools.is_empty();
        let wire = self.build_request(&request, &info);

        // Interleaved thinking across tool calls requires the beta header.
        let beta = (wire.thinking.is_some() && !request.tools.is_empty())
            .then(|| INTERLEAVED_THINKING_BETA.to_string());

        if let (Some(executor), false) = (tool_executor, request.tools.is_empty()) {
            let backend = AnthropicBackend {
                client: self.client.clone(),
                base: wire,
                beta,
            };
            return tool_loop::run_tool_loop(&backend, executor).await;
        }

        let response = self.client.chat(&wire, beta.as_deref()).await?;
        let turn = parse_turn(response);

        if structured {
            let extracted = turn
                .tool_uses
                .iter()
                .find(|tu| tu.name == EXTRACT_TOOL_NAME)
                .map(|tu| tu.input.clone())
                .ok_or_else(|| anyhow!("No structured output in Anthropic response"))?;
            return Ok(GenerationResponse {
                content: serde_json::to_string(&extracted)?,
                model_used: turn.model,
                usage: turn.usage,
                finish_reason: turn.stop_reason,
                raw_response: turn.raw,
                ..Default::default()
            });
        }

        Ok(GenerationResponse {
            content: turn.text.clone(),
            model_used: turn.model.clone(),
            usage: turn.usage.clone(),
            tool_calls: (!turn.tool_uses.is_empty()).then(|| turn.tool_uses.clone()),
            thinking_trace: turn.thinking.first().map(|t| t.thinking.clone()),
            finish_reason: turn.stop_reason.clone(),
            raw_response: turn.raw.clone(),
            ..Default::default()
        })
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<GenerationStream> {
        let info = self.require_model(&request.model).await?;
        self.check_capabilities(&info, &request)?;
        if !info.supports(Capability::Streaming) {
            return Err(anyhow!("Model '{}' does not support streaming", info.name));
        }

        // Structured output arrives as forced tool arguments, which have
        // no meaningful text deltas; emit the final snapshot once.
        if request.response_format.is_some() && request.tools.is_empty() {
            let response = self.generate(request, None).await?;
            return Ok(Box::pin(futures::stream::once(async move { response })));
        }

        let wire = self.build_request(&request, &info);
        let beta = (wire.thinking.is_some() && !request.tools.is_empty())
            .then(|| INTERLEAVED_THINKING_BETA.to_string());

        let backend = Arc::new(AnthropicBackend {
            client: self.client.clone(),
            base: wire,
            beta,
        });

        match (tool_executor, request.tools.is_empty()) {
            (Some(executor), false) => Ok(tool_loop::stream_tool_loop(backend, executor)),
            _ => Ok(tool_loop::stream_single_turn(backend)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ToolDefinition};

    fn provider() -> AnthropicProvider {
        let provider = AnthropicProvider::new("test-key");
        let mut cache = provider.model_cache.write().unwrap();
        for model in AnthropicProvider::catalog() {
            cache.insert(model.name.clone(), model);
        }
        drop(cache);
        provider
    }

    fn base_request() -> GenerationRequest {
        GenerationRequest::new(
            "claude-sonnet-4-5",
            vec![
                ChatMessage::system("Be terse."),
                ChatMessage::user("What is the sentiment?"),
            ],
        )
    }

    #[test]
    fn test_structured_output_injects_extract_tool() {
        let provider = provider();
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"sentiment": {"type": "string"}},
            "required": ["sentiment"]
        });
        let request = base_request().response_format(schema.clone());
        let info = provider.get_model_info("claude-sonnet-4-5").unwrap();
        let wire = provider.build_request(&request, &info);

        let tools = wire.tools.expect("extract tool injected");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "extract");
        assert_eq!(tools[0].input_schema, schema);
        assert_eq!(
            wire.tool_choice,
            Some(serde_json::json!({"type": "tool", "name": "extract"}))
        );
    }

    #[test]
    fn test_no_extract_tool_when_caller_has_tools() {
        let provider = provider();
        let request = base_request()
            .response_format(serde_json::json!({"type": "object"}))
            .tools(vec![ToolDefinition {
                name: "get_weather".into(),
                description: "weather".into(),
                parameters: serde_json::json!({"type": "object"}),
            }]);
        let info = provider.get_model_info("claude-sonnet-4-5").unwrap();
        let wire = provider.build_request(&request, &info);

        let tools = wire.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_weather");
        assert!(wire.tool_choice.is_none());
    }

    #[test]
    fn test_system_messages_merged() {
        let provider = provider();
        let request = GenerationRequest::new(
            "claude-sonnet-4-5",
            vec![
                ChatMessage::system("one"),
                ChatMessage::system("two"),
                ChatMessage::user("hi"),
            ],
        );
        let info = provider.get_model_info("claude-sonnet-4-5").unwrap();
        let wire = provider.build_request(&request, &info);
        assert_eq!(wire.system.as_deref(), Some("one\n\ntwo"));
        assert_eq!(wire.messages.len(), 1);
    }

    #[test]
    fn test_svg_media_dropped_text_kept() {
        let blocks = content_with_media(
            "describe this",
            &[MediaInput {
                content: vec![1, 2, 3],
                mime_type: "image/svg+xml".into(),
            }],
        );
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "describe this"));
    }

    #[test]
    fn test_images_precede_text() {
        let blocks = content_with_media(
            "caption",
            &[MediaInput {
                content: vec![0xFF, 0xD8],
                mime_type: "image/jpeg".into(),
            }],
        );
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Image { .. }));
        assert!(matches!(&blocks[1], ContentBlock::Text { .. }));
    }

    #[test]
    fn test_temperature_capped() {
        let provider = provider();
        let request = base_request().temperature(1.7);
        let info = provider.get_model_info("claude-sonnet-4-5").unwrap();
        let wire = provider.build_request(&request, &info);
        assert_eq!(wire.temperature, Some(1.0));
    }
}
