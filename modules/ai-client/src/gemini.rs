//! Gemini provider. Structured output uses the native
//! `responseMimeType: application/json` + `responseSchema` generation
//! config; tools and thinking are gated off by capability flags.

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

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model_cache: RwLock<HashMap<String, ModelInfo>>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

impl GeminiProvider {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: GEMINI_API_URL.to_string(),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model_cache: RwLock::new(HashMap::new()),
        }
    }

    fn catalog() -> Vec<ModelInfo> {
        let entry = |name: &str, description: &str| ModelInfo {
            name: name.to_string(),
            provider: "gemini".to_string(),
            supports_structured_output: true,
            supports_tools: false,
            supports_streaming: false,
            supports_thinking: false,
            supports_multimodal: false,
            max_tokens: None,
            context_length: Some(1_000_000),
            description: Some(description.to_string()),
        };
        vec![
            entry("gemini-2.0-flash", "Gemini 2.0 Flash - fast"),
            entry("gemini-1.5-pro", "Gemini 1.5 Pro - long context"),
        ]
    }
}

#[async_trait]
impl LanguageModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn discover_models(&self) -> Result<Vec<ModelInfo>> {
        let models = Self::catalog();
        let mut cache = self.model_cache.write().expect("model cache poisoned");
        for model in &models {
            cache.insert(model.name.clone(), model.clone());
        }
        info!(count = models.len(), "discovered Gemini models");
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

        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.clone()),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content}]
                })),
                Role::Assistant => contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{"text": msg.content}]
                })),
                Role::Tool => continue,
            }
        }

        let mut generation_config = serde_json::json!({
            "maxOutputTokens": request.max_tokens,
        });
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = serde_json::json!(temperature);
        }
        if let Some(ref schema) = request.response_format {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}]
            });
        }

        debug!(model = %request.model, "Gemini generateContent request");
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }
        let parsed: GeminiResponse = response.json().await?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No candidates in Gemini response"))?;
        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(GenerationResponse {
            content,
            model_used: request.model,
            usage: parsed.usage_metadata.map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            }),
            finish_reason: candidate.finish_reason,
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
