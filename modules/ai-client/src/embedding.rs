//! Embedding providers and their registry.
//!
//! Same registry shape as the language-model side: per-request API keys,
//! prefix-based provider inference, and a local-first default preference
//! (Ollama before any paid provider).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EmbeddingModelInfo {
    pub name: String,
    pub dimension: usize,
    pub description: String,
    pub max_sequence_length: usize,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, texts: &[String], model_name: Option<&str>) -> Result<Vec<Vec<f32>>>;
    fn available_models(&self) -> Vec<EmbeddingModelInfo>;

    fn model_dimension(&self, model_name: &str) -> Option<usize> {
        self.available_models()
            .into_iter()
            .find(|m| m.name == model_name)
            .map(|m| m.dimension)
    }
}

// =============================================================================
// OpenAI-compatible embedding endpoints (OpenAI, Voyage, Jina)
// =============================================================================

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

async fn post_embeddings(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let body = serde_json::json!({ "model": model, "input": texts });
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await?;
        return Err(anyhow!("Embedding API error ({}): {}", status, error_text));
    }
    let parsed: EmbeddingResponse = response.json().await?;
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

pub struct OpenAiEmbeddings {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, texts: &[String], model_name: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let model = model_name.unwrap_or("text-embedding-3-small");
        post_embeddings(
            &self.http,
            "https://api.openai.com/v1/embeddings",
            &self.api_key,
            model,
            texts,
        )
        .await
    }

    fn available_models(&self) -> Vec<EmbeddingModelInfo> {
        vec![
            EmbeddingModelInfo {
                name: "text-embedding-3-small".into(),
                dimension: 1536,
                description: "OpenAI small embedding model".into(),
                max_sequence_length: 8191,
            },
            EmbeddingModelInfo {
                name: "text-embedding-3-large".into(),
                dimension: 3072,
                description: "OpenAI large embedding model".into(),
                max_sequence_length: 8191,
            },
        ]
    }
}

pub struct VoyageEmbeddings {
    http: reqwest::Client,
    api_key: String,
}

impl VoyageEmbeddings {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageEmbeddings {
    fn name(&self) -> &str {
        "voyage"
    }

    async fn embed(&self, texts: &[String], model_name: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let model = model_name.unwrap_or("voyage-3");
        post_embeddings(
            &self.http,
            "https://api.voyageai.com/v1/embeddings",
            &self.api_key,
            model,
            texts,
        )
        .await
    }

    fn available_models(&self) -> Vec<EmbeddingModelInfo> {
        vec![
            EmbeddingModelInfo {
                name: "voyage-3".into(),
                dimension: 1024,
                description: "Voyage general-purpose embeddings".into(),
                max_sequence_length: 32_000,
            },
            EmbeddingModelInfo {
                name: "voyage-3-lite".into(),
                dimension: 512,
                description: "Voyage lightweight embeddings".into(),
                max_sequence_length: 32_000,
            },
        ]
    }
}

pub struct JinaEmbeddings {
    http: reqwest::Client,
    api_key: String,
}

impl JinaEmbeddings {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for JinaEmbeddings {
    fn name(&self) -> &str {
        "jina"
    }

    async fn embed(&self, texts: &[String], model_name: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let model = model_name.unwrap_or("jina-embeddings-v3");
        post_embeddings(
            &self.http,
            "https://api.jina.ai/v1/embeddings",
            &self.api_key,
            model,
            texts,
        )
        .await
    }

    fn available_models(&self) -> Vec<EmbeddingModelInfo> {
        vec![EmbeddingModelInfo {
            name: "jina-embeddings-v3".into(),
            dimension: 1024,
            description: "Jina v3 multilingual embeddings".into(),
            max_sequence_length: 8192,
        }]
    }
}

pub struct OllamaEmbeddings {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddings {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, texts: &[String], model_name: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let model = model_name.unwrap_or("nomic-embed-text");
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({ "model": model, "input": texts });
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Ollama embed error ({}): {}", status, error_text));
        }
        let parsed: OllamaEmbedResponse = response.json().await?;
        Ok(parsed.embeddings)
    }

    fn available_models(&self) -> Vec<EmbeddingModelInfo> {
        vec![EmbeddingModelInfo {
            name: "nomic-embed-text".into(),
            dimension: 768,
            description: "Local Nomic embeddings via Ollama".into(),
            max_sequence_length: 8192,
        }]
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    pub name: String,
    pub requires_api_key: bool,
    /// Environment-supplied key; runtime keys override it.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

pub struct EmbeddingProviderRegistryService {
    /// Preference order: local/free first, then paid in insertion order.
    configs: Vec<EmbeddingProviderConfig>,
    singletons: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl EmbeddingProviderRegistryService {
    pub fn new(configs: Vec<EmbeddingProviderConfig>) -> Self {
        Self {
            configs,
            singletons: Mutex::new(HashMap::new()),
        }
    }

    /// Default wiring: Ollama first (key-less), then the paid providers.
    pub fn with_defaults(ollama_base_url: &str) -> Self {
        Self::new(vec![
            EmbeddingProviderConfig {
                name: "ollama".into(),
                requires_api_key: false,
                api_key: None,
                base_url: Some(ollama_base_url.to_string()),
            },
            EmbeddingProviderConfig {
                name: "openai".into(),
                requires_api_key: true,
                api_key: None,
                base_url: None,
            },
            EmbeddingProviderConfig {
                name: "voyage".into(),
                requires_api_key: true,
                api_key: None,
                base_url: None,
            },
            EmbeddingProviderConfig {
                name: "jina".into(),
                requires_api_key: true,
                api_key: None,
                base_url: None,
            },
        ])
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.configs.iter().map(|c| c.name.clone()).collect()
    }

    pub fn create_provider(
        &self,
        provider_name: &str,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let config = self
            .configs
            .iter()
            .find(|c| c.name == provider_name)
            .ok_or_else(|| anyhow!("Unknown embedding provider: {provider_name}"))?;

        let effective_key = api_key
            .map(str::to_string)
            .or_else(|| config.api_key.clone());

        if config.requires_api_key {
            let key = effective_key.ok_or_else(|| {
                anyhow!(
                    "Embedding provider '{provider_name}' requires an API key: supply a runtime key or set the environment variable"
                )
            })?;
            let provider: Arc<dyn EmbeddingProvider> = match provider_name {
                "openai" => Arc::new(OpenAiEmbeddings::new(&key)),
                "voyage" => Arc::new(VoyageEmbeddings::new(&key)),
                "jina" => Arc::new(JinaEmbeddings::new(&key)),
                other => return Err(anyhow!("Unknown embedding provider: {other}")),
            };
            // Fresh per request when keyed; no sharing.
            if api_key.is_some() {
                return Ok(provider);
            }
            self.singletons
                .lock()
                .expect("singleton cache poisoned")
                .insert(provider_name.to_string(), provider.clone());
            return Ok(provider);
        }

        // Key-less providers are cached singletons.
        if let Some(existing) = self
            .singletons
            .lock()
            .expect("singleton cache poisoned")
            .get(provider_name)
        {
            return Ok(existing.clone());
        }
        let provider: Arc<dyn EmbeddingProvider> = match provider_name {
            "ollama" => Arc::new(OllamaEmbeddings::new(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or("http://localhost:11434"),
            )),
            other => return Err(anyhow!("Unknown embedding provider: {other}")),
        };
        self.singletons
            .lock()
            .expect("singleton cache poisoned")
            .insert(provider_name.to_string(), provider.clone());
        Ok(provider)
    }

    /// `text-embedding-*` -> openai, `voyage-*` -> voyage, `jina-*` -> jina,
    /// everything else is assumed local.
    pub fn infer_provider_from_model_name(model_name: &str) -> &'static str {
        let lowered = model_name.to_lowercase();
        if lowered.starts_with("text-embedding-") {
            "openai"
        } else if lowered.starts_with("voyage-") {
            "voyage"
        } else if lowered.starts_with("jina-") {
            "jina"
        } else {
            "ollama"
        }
    }

    pub fn get_provider_for_model(
        &self,
        model_name: &str,
        api_keys: Option<&HashMap<String, String>>,
    ) -> Result<(Arc<dyn EmbeddingProvider>, String)> {
        let provider_name = Self::infer_provider_from_model_name(model_name);
        debug!(model = model_name, provider = provider_name, "embedding provider inference");
        let key = api_keys.and_then(|k| k.get(provider_name)).map(String::as_str);
        let provider = self.create_provider(provider_name, key)?;
        Ok((provider, provider_name.to_string()))
    }

    /// Deterministic preference: local/free first, then paid providers in
    /// insertion order, limited to those whose credentials are present.
    pub fn get_default_provider(
        &self,
        api_keys: Option<&HashMap<String, String>>,
    ) -> Option<Arc<dyn EmbeddingProvider>> {
        for config in &self.configs {
            let key = api_keys.and_then(|k| k.get(&config.name)).map(String::as_str);
            if config.requires_api_key && key.is_none() && config.api_key.is_none() {
                continue;
            }
            match self.create_provider(&config.name, key) {
                Ok(provider) => {
                    info!(provider = %config.name, "selected default embedding provider");
                    return Some(provider);
                }
                Err(_) => continue,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_inference() {
        let infer = EmbeddingProviderRegistryService::infer_provider_from_model_name;
        assert_eq!(infer("text-embedding-3-small"), "openai");
        assert_eq!(infer("voyage-3"), "voyage");
        assert_eq!(infer("jina-embeddings-v3"), "jina");
        assert_eq!(infer("nomic-embed-text"), "ollama");
    }

    #[test]
    fn test_default_provider_prefers_local() {
        let registry =
            EmbeddingProviderRegistryService::with_defaults("http://localhost:11434");
        let provider = registry.get_default_provider(None).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_keyed_provider_requires_key() {
        let registry =
            EmbeddingProviderRegistryService::with_defaults("http://localhost:11434");
        assert!(registry.create_provider("voyage", None).is_err());
        assert!(registry.create_provider("voyage", Some("vk-123")).is_ok());
    }
}
