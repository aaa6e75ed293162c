//! Ollama provider: key-less local models. Structured output rides on the
//! `format: "json"` mode with the schema inlined into a system message;
//! tools, thinking and streaming are not offered (capability flags gate
//! them off upstream).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::{
    GenerationRequest, GenerationResponse, GenerationStream, LanguageModelProvider, ModelInfo,
    Role, ToolExecutor, Usage,
};
use crate::util::strip_code_blocks;

pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model_cache: RwLock<HashMap<String, ModelInfo>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    fn model_info(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            provider: "ollama".to_string(),
            supports_structured_output: true,
            supports_tools: false,
            supports_streaming: false,
            supports_thinking: false,
            supports_multimodal: false,
            max_tokens: None,
            context_length: None,
            description: Some("Local Ollama model".to_string()),
        }
    }
}

#[async_trait]
impl LanguageModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn discover_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Ollama API error ({}): tags listing failed",
                response.status()
            ));
        }
        let tags: TagsResponse = response.json().await?;
        let models: Vec<ModelInfo> = tags
            .models
            .iter()
            .map(|m| Self::model_info(&m.name))
            .collect();

        let mut cache = self.model_cache.write().expect("model cache poisoned");
        for model in &models {
            cache.insert(model.name.clone(), model.clone());
        }
        info!(count = models.len(), "discovered Ollama models");
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
        _tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<GenerationResponse> {
        if !request.tools.is_empty() {
            return Err(anyhow!("Model '{}' does not support tools", request.model));
        }
        if request.thinking_enabled {
            return Err(anyhow!(
                "Model '{}' does not support thinking",
                request.model
            ));
        }
        if !request.media.is_empty() {
            return Err(anyhow!(
                "Model '{}' does not support multimodal inputs",
                request.model
            ));
        }

        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(ref schema) = request.response_format {
            messages.push(serde_json::json!({
                "role": "system",
                "content": format!(
                    "Respond with a single JSON object matching this JSON schema, and nothing else:\n{schema}"
                ),
            }));
        }
        for msg in &request.messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => continue,
            };
            messages.push(serde_json::json!({"role": role, "content": msg.content}));
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });
        if request.response_format.is_some() {
            body["format"] = serde_json::json!("json");
        }
        if let Some(temperature) = request.temperature {
            body["options"] = serde_json::json!({"temperature": temperature});
        }

        debug!(model = %request.model, "Ollama chat request");
        let url = format!("{}/api/chat", self.base_url);
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Ollama API error ({}): {}", status, error_text));
        }
        let parsed: OllamaChatResponse = response.json().await?;

        let content = if request.response_format.is_some() {
            strip_code_blocks(&parsed.message.content).to_string()
        } else {
            parsed.message.content
        };

        Ok(GenerationResponse {
            content,
            model_used: if parsed.model.is_empty() {
                request.model
            } else {
                parsed.model
            },
            usage: match (parsed.prompt_eval_count, parsed.eval_count) {
                (Some(input), Some(output)) => Some(Usage {
                    input_tokens: input,
                    output_tokens: output,
                }),
                _ => None,
            },
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        _tool_executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<GenerationStream> {
        Err(anyhow!(
            "Model '{}' does not support streaming",
            request.model
        ))
    }
}
