//! Model registry: configured providers, lazy instantiation, a
//! process-wide `{model_name -> ModelInfo}` cache, and capability-based
//! routing with targeted fallback.
//!
//! Providers that require API keys are constructed fresh per request when
//! a runtime key is supplied (no sharing); key-less providers are cached
//! singletons. Cache inserts are idempotent, so readers tolerate missing
//! entries and writes take the lock only briefly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info};

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::types::{
    Capability, GenerationRequest, GenerationResponse, GenerationStream, LanguageModelProvider,
    ModelInfo, ToolExecutor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

/// Configuration for one language-model provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Environment-supplied key; runtime keys override it.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub enabled: bool,
}

pub type RuntimeApiKeys = HashMap<String, String>;

pub struct ModelRegistryService {
    configs: Vec<ProviderConfig>,
    /// Cached singletons: key-less providers plus env-keyed ones.
    providers: RwLock<HashMap<String, Arc<dyn LanguageModelProvider>>>,
    models_cache: RwLock<HashMap<String, ModelInfo>>,
}

impl ModelRegistryService {
    pub fn new() -> Self {
        Self {
            configs: Vec::new(),
            providers: RwLock::new(HashMap::new()),
            models_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn configure_provider(&mut self, config: ProviderConfig) {
        info!(provider = %config.name, "configured provider");
        self.configs.push(config);
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect()
    }

    fn config(&self, name: &str) -> Option<&ProviderConfig> {
        self.configs.iter().find(|c| c.name == name && c.enabled)
    }

    fn build_provider(
        config: &ProviderConfig,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn LanguageModelProvider>> {
        let key_for = |provider: &str| -> Result<String> {
            api_key
                .map(str::to_string)
                .or_else(|| config.api_key.clone())
                .ok_or_else(|| {
                    anyhow!(
                        "Provider '{provider}' requires an API key: supply a runtime key or set the environment variable"
                    )
                })
        };

        let provider: Arc<dyn LanguageModelProvider> = match config.kind {
            ProviderKind::Anthropic => {
                let key = key_for("anthropic")?;
                match &config.base_url {
                    Some(url) => Arc::new(AnthropicProvider::with_base_url(&key, url)),
                    None => Arc::new(AnthropicProvider::new(&key)),
                }
            }
            ProviderKind::OpenAi => {
                let key = key_for("openai")?;
                match &config.base_url {
                    Some(url) => Arc::new(OpenAiProvider::with_base_url(&key, url)),
                    None => Arc::new(OpenAiProvider::new(&key)),
                }
            }
            ProviderKind::Gemini => {
                let key = key_for("gemini")?;
                match &config.base_url {
                    Some(url) => Arc::new(GeminiProvider::with_base_url(&key, url)),
                    None => Arc::new(GeminiProvider::new(&key)),
                }
            }
            ProviderKind::Ollama => Arc::new(OllamaProvider::new(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or("http://localhost:11434"),
            )),
        };
        Ok(provider)
    }

    fn runtime_key<'a>(
        runtime_api_keys: Option<&'a RuntimeApiKeys>,
        provider_name: &str,
    ) -> Option<&'a str> {
        runtime_api_keys
            .and_then(|keys| keys.get(provider_name))
            .map(String::as_str)
            .filter(|k| !k.is_empty() && *k != "placeholder")
    }

    /// Resolve a provider instance by name. A runtime key always yields a
    /// fresh instance; otherwise the cached singleton is used.
    fn resolve_provider(
        &self,
        provider_name: &str,
        runtime_api_keys: Option<&RuntimeApiKeys>,
    ) -> Result<Arc<dyn LanguageModelProvider>> {
        let config = self
            .config(provider_name)
            .ok_or_else(|| anyhow!("Provider '{provider_name}' is not configured"))?;

        if let Some(key) = Self::runtime_key(runtime_api_keys, provider_name) {
            return Self::build_provider(config, Some(key));
        }

        if let Some(existing) = self
            .providers
            .read()
            .expect("provider cache poisoned")
            .get(provider_name)
        {
            return Ok(existing.clone());
        }

        let provider = Self::build_provider(config, None)?;
        self.providers
            .write()
            .expect("provider cache poisoned")
            .insert(provider_name.to_string(), provider.clone());
        Ok(provider)
    }

    /// Instantiate every enabled provider whose credentials are available.
    pub async fn initialize_providers(&self) {
        for config in self.configs.iter().filter(|c| c.enabled) {
            if config.kind.requires_api_key() && config.api_key.is_none() {
                debug!(provider = %config.name, "no environment key; deferring to runtime keys");
                continue;
            }
            match self.resolve_provider(&config.name, None) {
                Ok(_) => info!(provider = %config.name, "initialized provider"),
                Err(e) => error!(provider = %config.name, error = %e, "failed to initialize provider"),
            }
        }
    }

    async fn discover_into_cache(
        &self,
        provider: &Arc<dyn LanguageModelProvider>,
        provider_name: &str,
    ) -> Vec<ModelInfo> {
        match provider.discover_models().await {
            Ok(models) => {
                let mut cache = self.models_cache.write().expect("model cache poisoned");
                for model in &models {
                    cache.insert(model.name.clone(), model.clone());
                }
                models
            }
            Err(e) => {
                error!(provider = provider_name, error = %e, "model discovery failed");
                Vec::new()
            }
        }
    }

    /// Discover models from all resolvable providers.
    pub async fn discover_all_models(
        &self,
        force_refresh: bool,
        runtime_api_keys: Option<&RuntimeApiKeys>,
    ) -> HashMap<String, Vec<ModelInfo>> {
        if !force_refresh {
            let cache = self.models_cache.read().expect("model cache poisoned");
            if !cache.is_empty() {
                let mut by_provider: HashMap<String, Vec<ModelInfo>> = HashMap::new();
                for model in cache.values() {
                    by_provider
                        .entry(model.provider.clone())
                        .or_default()
                        .push(model.clone());
                }
                return by_provider;
            }
        }

        let mut results = HashMap::new();
        for config in self.configs.iter().filter(|c| c.enabled) {
            let provider = match self.resolve_provider(&config.name, runtime_api_keys) {
                Ok(provider) => provider,
                Err(e) => {
                    debug!(provider = %config.name, error = %e, "skipping discovery");
                    continue;
                }
            };
            let models = self.discover_into_cache(&provider, &config.name).await;
            results.insert(config.name.clone(), models);
        }
        results
    }

    pub fn cached_model_info(&self, model_name: &str) -> Option<ModelInfo> {
        self.models_cache
            .read()
            .expect("model cache poisoned")
            .get(model_name)
            .cloned()
    }

    pub async fn get_model_info(&self, model_name: &str) -> Option<ModelInfo> {
        if let Some(info) = self.cached_model_info(model_name) {
            return Some(info);
        }
        self.discover_all_models(false, None).await;
        self.cached_model_info(model_name)
    }

    /// Infer the owning provider from well-known model-name prefixes.
    pub fn infer_provider_from_model_name(model_name: &str) -> Option<&'static str> {
        let lowered = model_name.to_lowercase();
        if lowered.starts_with("claude-") {
            Some("anthropic")
        } else if lowered.starts_with("gpt-")
            || lowered.starts_with("chatgpt-")
            || lowered.starts_with("o1")
            || lowered.starts_with("o3")
            || lowered.starts_with("text-embedding-")
        {
            Some("openai")
        } else if lowered.starts_with("gemini-") {
            Some("gemini")
        } else {
            None
        }
    }

    /// Find which provider serves a model.
    ///
    /// Resolution order: model cache, then targeted discovery against the
    /// provider inferred from the name prefix, then one full refresh.
    pub async fn get_provider_for_model(
        &self,
        model_name: &str,
        runtime_api_keys: Option<&RuntimeApiKeys>,
    ) -> Result<Option<(Arc<dyn LanguageModelProvider>, String)>> {
        if let Some(info) = self.cached_model_info(model_name) {
            let provider = self.resolve_provider(&info.provider, runtime_api_keys)?;
            return Ok(Some((provider, info.provider)));
        }

        // Targeted discovery against just the inferred provider.
        if let Some(inferred) = Self::infer_provider_from_model_name(model_name) {
            if self.config(inferred).is_some() {
                debug!(model = model_name, provider = inferred, "targeted discovery");
                if let Ok(provider) = self.resolve_provider(inferred, runtime_api_keys) {
                    self.discover_into_cache(&provider, inferred).await;
                    if let Some(info) = self.cached_model_info(model_name) {
                        return Ok(Some((provider, info.provider)));
                    }
                }
            }
        }

        // Full refresh, once.
        self.discover_all_models(true, runtime_api_keys).await;
        if let Some(info) = self.cached_model_info(model_name) {
            let provider = self.resolve_provider(&info.provider, runtime_api_keys)?;
            return Ok(Some((provider, info.provider)));
        }

        Ok(None)
    }

    /// Main entry point: route a request to whichever provider serves the
    /// model and generate.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
        runtime_api_keys: Option<&RuntimeApiKeys>,
    ) -> Result<GenerationResponse> {
        let (provider, provider_name) = self
            .get_provider_for_model(&request.model, runtime_api_keys)
            .await?
            .ok_or_else(|| anyhow!("Model '{}' not found in any provider", request.model))?;

        debug!(model = %request.model, provider = %provider_name, "routing generation");
        provider
            .generate(request, tool_executor)
            .await
            .with_context(|| format!("generation failed on provider '{provider_name}'"))
    }

    pub async fn generate_stream(
        &self,
        request: GenerationRequest,
        tool_executor: Option<Arc<dyn ToolExecutor>>,
        runtime_api_keys: Option<&RuntimeApiKeys>,
    ) -> Result<GenerationStream> {
        let (provider, provider_name) = self
            .get_provider_for_model(&request.model, runtime_api_keys)
            .await?
            .ok_or_else(|| anyhow!("Model '{}' not found in any provider", request.model))?;

        debug!(model = %request.model, provider = %provider_name, "routing streamed generation");
        provider
            .generate_stream(request, tool_executor)
            .await
            .with_context(|| format!("generation failed on provider '{provider_name}'"))
    }

    pub fn get_models_by_capability(&self, capability: Capability) -> Vec<ModelInfo> {
        self.models_cache
            .read()
            .expect("model cache poisoned")
            .values()
            .filter(|m| m.supports(capability))
            .cloned()
            .collect()
    }

    pub fn get_models_by_provider(&self, provider_name: &str) -> Vec<ModelInfo> {
        self.models_cache
            .read()
            .expect("model cache poisoned")
            .values()
            .filter(|m| m.provider == provider_name)
            .cloned()
            .collect()
    }
}

impl Default for ModelRegistryService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistryService {
        let mut registry = ModelRegistryService::new();
        registry.configure_provider(ProviderConfig {
            name: "anthropic".into(),
            kind: ProviderKind::Anthropic,
            api_key: Some("env-key".into()),
            base_url: None,
            enabled: true,
        });
        registry.configure_provider(ProviderConfig {
            name: "ollama".into(),
            kind: ProviderKind::Ollama,
            api_key: None,
            base_url: None,
            enabled: true,
        });
        registry
    }

    #[test]
    fn test_prefix_inference() {
        assert_eq!(
            ModelRegistryService::infer_provider_from_model_name("claude-sonnet-4-5"),
            Some("anthropic")
        );
        assert_eq!(
            ModelRegistryService::infer_provider_from_model_name("gpt-4o"),
            Some("openai")
        );
        assert_eq!(
            ModelRegistryService::infer_provider_from_model_name("text-embedding-3-small"),
            Some("openai")
        );
        assert_eq!(
            ModelRegistryService::infer_provider_from_model_name("gemini-2.0-flash"),
            Some("gemini")
        );
        assert_eq!(
            ModelRegistryService::infer_provider_from_model_name("llama3.2"),
            None
        );
    }

    #[tokio::test]
    async fn test_targeted_discovery_finds_claude_model() {
        let registry = registry();
        let result = registry
            .get_provider_for_model("claude-sonnet-4-5", None)
            .await
            .unwrap();
        let (_, name) = result.expect("model resolved");
        assert_eq!(name, "anthropic");
        assert!(registry.cached_model_info("claude-sonnet-4-5").is_some());
    }

    #[tokio::test]
    async fn test_missing_key_is_clear_error() {
        let mut registry = ModelRegistryService::new();
        registry.configure_provider(ProviderConfig {
            name: "anthropic".into(),
            kind: ProviderKind::Anthropic,
            api_key: None,
            base_url: None,
            enabled: true,
        });
        let err = match registry.resolve_provider("anthropic", None) {
            Err(e) => e,
            Ok(_) => panic!("expected resolve_provider to fail"),
        };
        assert!(err.to_string().contains("requires an API key"));
    }

    #[tokio::test]
    async fn test_runtime_key_builds_fresh_instance() {
        let registry = registry();
        let mut keys = RuntimeApiKeys::new();
        keys.insert("anthropic".into(), "runtime-key".into());

        let a = registry.resolve_provider("anthropic", Some(&keys)).unwrap();
        let b = registry.resolve_provider("anthropic", Some(&keys)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        // Key-less providers come from the singleton cache.
        let c = registry.resolve_provider("ollama", None).unwrap();
        let d = registry.resolve_provider("ollama", None).unwrap();
        assert!(Arc::ptr_eq(&c, &d));
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let mut registry = ModelRegistryService::new();
        registry.configure_provider(ProviderConfig {
            name: "openai".into(),
            kind: ProviderKind::OpenAi,
            api_key: None,
            base_url: None,
            enabled: true,
        });
        let mut keys = RuntimeApiKeys::new();
        keys.insert("openai".into(), "placeholder".into());
        assert!(registry.resolve_provider("openai", Some(&keys)).is_err());
    }
}
