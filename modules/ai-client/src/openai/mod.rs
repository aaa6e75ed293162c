//! OpenAI provider. Structured output uses the native
//! `response_format = {type: json_schema}` mode; tools use the native
//! function-calling shape. The shared tool loop maps its neutral messages
//! onto assistant `tool_calls` plus one `tool`-role message per result.

mod client;
mod wire;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use tracing::{info, warn};

use crate::tool_loop::{
    self, ChatBackend, LoopMessage, ParsedTurn, StreamDelta, ToolResultContent,
};
use crate::types::{
    Capability, GenerationRequest, GenerationResponse, GenerationStream, LanguageModelProvider,
    MediaInput, ModelInfo, Role, ToolExecutor, ToolUse, Usage, ALLOWED_IMAGE_TYPES,
};

use client::OpenAiClient;
use wire::*;

pub struct OpenAiProvider {
    client: Arc<OpenAiClient>,
    model_cache: RwLock<HashMap<String, ModelInfo>>,
}

impl OpenAiProvider {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Arc::new(OpenAiClient::new(api_key)),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Arc::new(OpenAiClient::new(api_key).with_base_url(base_url)),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    fn catalog() -> Vec<ModelInfo> {
        let entry = |name: &str, multimodal: bool, description: &str| ModelInfo {
            name: name.to_string(),
            provider: "openai".to_string(),
            supports_structured_output: true,
            supports_tools: true,
            supports_streaming: true,
            supports_thinking: false,
            supports_multimodal: multimodal,
            max_tokens: None,
            context_length: Some(128_000),
            description: Some(description.to_string()),
        };
        vec![
            entry("gpt-4o", true, "GPT-4o - flagship multimodal"),
            entry("gpt-4o-mini", true, "GPT-4o mini - fast and cheap"),
            entry("gpt-4.1", true, "GPT-4.1 - long context"),
        ]
    }

    async fn require_model(&self, model_name: &str) -> Result<ModelInfo> {
        let cache_empty = self.model_cache.read().expect("model cache poisoned").is_empty();
        if cache_empty {
            self.discover_models().await?;
        }
        self.get_model_info(model_name)
            .ok_or_else(|| anyhow!("Model '{model_name}' not found in provider openai"))
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

    fn build_request(&self, request: &GenerationRequest) -> ChatRequest {
        let last_user_idx = request
            .messages
            .iter()
            .rposition(|m| matches!(m.role, Role::User));

        let mut messages = Vec::new();
        for (idx, msg) in request.messages.iter().enumerate() {
            if msg.content.trim().is_empty() {
                warn!(role = ?msg.role, "skipping message with empty content");
                continue;
            }
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => {
                    warn!("tool-role messages are produced by the loop; skipping");
                    continue;
                }
            };
            if role == "user" && Some(idx) == last_user_idx && !request.media.is_empty() {
                messages.push(WireMessage {
                    role: role.to_string(),
                    content: Some(content_with_media(&msg.content, &request.media)),
                    tool_calls: None,
                    tool_call_id: None,
                });
            } else {
                messages.push(WireMessage::text(role, &msg.content));
            }
        }

        let tools = (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|t| ToolWire {
                    kind: "function".to_string(),
                    function: FunctionWire {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        });

        let response_format = request.response_format.as_ref().map(|schema| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_response",
                    "schema": schema,
                }
            })
        });

        ChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone(),
            tools,
            response_format,
            stream: None,
        }
    }
}

/// Images before text, as data URLs.
fn content_with_media(text: &str, media: &[MediaInput]) -> serde_json::Value {
    let mut parts = Vec::new();
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
        parts.push(serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", item.mime_type, data) }
        }));
    }
    if !text.trim().is_empty() {
        parts.push(serde_json::json!({"type": "text", "text": text}));
    }
    serde_json::Value::Array(parts)
}

fn parse_turn(response: ChatResponse) -> Result<ParsedTurn> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No choices in OpenAI response"))?;

    let mut turn = ParsedTurn {
        model: response.model,
        stop_reason: choice.finish_reason,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        text: choice.message.content.unwrap_or_default(),
        ..Default::default()
    };

    for tc in choice.message.tool_calls.unwrap_or_default() {
        let input = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
            warn!(error = %e, "failed to parse tool arguments");
            serde_json::Value::Object(Default::default())
        });
        turn.tool_uses.push(ToolUse {
            id: tc.id,
            name: tc.function.name,
            input,
        });
    }
    Ok(turn)
}

fn loop_messages_to_wire(messages: &[LoopMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::new();
    for message in messages {
        match message {
            LoopMessage::Assistant {
                text, tool_uses, ..
            } => {
                wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: text.clone().map(serde_json::Value::String),
                    tool_calls: Some(
                        tool_uses
                            .iter()
                            .map(|tu| ToolCallWire {
                                id: tu.id.clone(),
                                kind: "function".to_string(),
                                function: FunctionCallWire {
                                    name: tu.name.clone(),
                                    arguments: tu.input.to_string(),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                });
            }
            LoopMessage::ToolResults(results) => {
                // OpenAI wants one tool-role message per result, in order.
                for result in results {
                    let content = match &result.content {
                        ToolResultContent::Text(s) => s.clone(),
                        ToolResultContent::Blocks(blocks) => blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    };
                    wire.push(WireMessage {
                        role: "tool".to_string(),
                        content: Some(serde_json::Value::String(content)),
                        tool_calls: None,
                        tool_call_id: Some(result.tool_use_id.clone()),
                    });
                }
            }
        }
    }
    wire
}

struct OpenAiBackend {
    client: Arc<OpenAiClient>,
    base: ChatRequest,
}

impl OpenAiBackend {
    fn request_with(&self, appended: &[LoopMessage]) -> ChatRequest {
        let mut request = self.base.clone();
        request.messages.extend(loop_messages_to_wire(appended));
        request
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.base.model
    }

    async fn chat(&self, appended: &[LoopMessage]) -> Result<ParsedTurn> {
        let request = self.request_with(appended);
        parse_turn(self.client.chat(&request).await?)
    }

    async fn chat_streamed(
        &self,
        appended: &[LoopMessage],
        deltas: tokio::sync::mpsc::UnboundedSender<StreamDelta>,
    ) -> Result<ParsedTurn> {
        let request = self.request_with(appended);
        parse_turn(self.client.chat_streamed(&request, deltas).await?)
    }
}

#[async_trait]
impl LanguageModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn discover_models(&self) -> Result<Vec<ModelInfo>> {
        let models = Self::catalog();
        let mut cache = self.model_cache.write().expect("model cache poisoned");
        for model in &models {
            cache.insert(model.name.clone(), model.clone());
        }
        info!(count = models.len(), "discovered OpenAI models");
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

        let wire = self.build_request(&request);

        if let (Some(executor), false) = (tool_executor, request.tools.is_empty()) {
            let backend = OpenAiBackend {
                client: self.client.clone(),
                base: wire,
            };
            return tool_loop::run_tool_loop(&backend, executor).await;
        }

        let turn = parse_turn(self.client.chat(&wire).await?)?;
        Ok(GenerationResponse {
            content: turn.text.clone(),
            model_used: turn.model.clone(),
            usage: turn.usage.clone(),
            tool_calls: (!turn.tool_uses.is_empty()).then(|| turn.tool_uses.clone()),
            finish_reason: turn.stop_reason.clone(),
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

        let backend = Arc::new(OpenAiBackend {
            client: self.client.clone(),
            base: self.build_request(&request),
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
    use crate::types::ChatMessage;

    #[test]
    fn test_native_json_schema_response_format() {
        let provider = OpenAiProvider::new("test-key");
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"sentiment": {"type": "string"}}
        });
        let request = GenerationRequest::new("gpt-4o", vec![ChatMessage::user("classify")])
            .response_format(schema.clone());
        let wire = provider.build_request(&request);

        let format = wire.response_format.unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["schema"], schema);
    }

    #[test]
    fn test_tool_results_become_tool_role_messages() {
        let messages = vec![LoopMessage::ToolResults(vec![
            crate::tool_loop::ToolResultBlock {
                tool_use_id: "call_1".into(),
                content: ToolResultContent::Text("22°C sunny".into()),
                is_error: false,
            },
            crate::tool_loop::ToolResultBlock {
                tool_use_id: "call_2".into(),
                content: ToolResultContent::Text("dry".into()),
                is_error: false,
            },
        ])];
        let wire = loop_messages_to_wire(&messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call_2"));
    }
}
