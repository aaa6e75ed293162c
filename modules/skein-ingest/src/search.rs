//! Web-search providers and their registry. SearXNG is the local/free
//! default; Tavily is the paid fallback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: Option<f64>,
    pub provider: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

// =============================================================================
// Tavily
// =============================================================================

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

pub struct TavilySearcher {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Deserialize)]
struct TavilyHit {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

impl TavilySearcher {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearcher {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        debug!(query, max_results, "querying Tavily");

        let body = serde_json::json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "advanced",
            "include_answer": false,
        });

        let response = self
            .client
            .post(TAVILY_SEARCH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Tavily request did not complete for '{query}'"))?;
        if !response.status().is_success() {
            anyhow::bail!("Tavily returned {} for '{query}'", response.status());
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .context("Tavily reply was not the expected JSON shape")?;

        let results: Vec<SearchResult> = parsed
            .results
            .into_iter()
            .map(|hit| SearchResult {
                url: hit.url,
                title: hit.title,
                snippet: hit.content,
                score: hit.score,
                provider: "tavily".to_string(),
            })
            .collect();

        info!(query, hits = results.len(), "Tavily query finished");
        Ok(results)
    }
}

// =============================================================================
// SearXNG (local metasearch, no key)
// =============================================================================

pub struct SearxSearcher {
    base_url: String,
    client: reqwest::Client,
}

impl SearxSearcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for SearxSearcher {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        info!(query, max_results, "SearXNG search");

        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .context("SearXNG request failed")?;

        let data: serde_json::Value = resp.json().await.context("Failed to parse SearXNG response")?;

        let mut results: Vec<SearchResult> = data["results"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        let url = r["url"].as_str()?.to_string();
                        Some(SearchResult {
                            url,
                            title: r["title"].as_str().unwrap_or("").to_string(),
                            snippet: r["content"].as_str().unwrap_or("").to_string(),
                            score: r["score"].as_f64(),
                            provider: "searxng".to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        results.truncate(max_results);

        info!(query, count = results.len(), "SearXNG search complete");
        Ok(results)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
pub struct SearchProviderConfig {
    pub name: String,
    pub requires_api_key: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Same registry shape as the model/embedding registries: per-request
/// keys override environment keys; key-less providers are singletons;
/// default preference is local/free first, then paid in insertion order.
pub struct SearchProviderRegistryService {
    configs: Vec<SearchProviderConfig>,
    singletons: Mutex<HashMap<String, Arc<dyn SearchProvider>>>,
}

impl SearchProviderRegistryService {
    pub fn new(configs: Vec<SearchProviderConfig>) -> Self {
        Self {
            configs,
            singletons: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults(searxng_base_url: Option<String>, tavily_api_key: Option<String>) -> Self {
        let mut configs = Vec::new();
        if let Some(base_url) = searxng_base_url {
            configs.push(SearchProviderConfig {
                name: "searxng".into(),
                requires_api_key: false,
                api_key: None,
                base_url: Some(base_url),
            });
        }
        configs.push(SearchProviderConfig {
            name: "tavily".into(),
            requires_api_key: true,
            api_key: tavily_api_key,
            base_url: None,
        });
        Self::new(configs)
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.configs.iter().map(|c| c.name.clone()).collect()
    }

    pub fn create_provider(
        &self,
        provider_name: &str,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn SearchProvider>> {
        let config = self
            .configs
            .iter()
            .find(|c| c.name == provider_name)
            .ok_or_else(|| anyhow!("Unknown search provider: {provider_name}"))?;

        if config.requires_api_key {
            let key = api_key
                .map(str::to_string)
                .or_else(|| config.api_key.clone())
                .ok_or_else(|| {
                    anyhow!("Search provider '{provider_name}' requires an API key")
                })?;
            let provider: Arc<dyn SearchProvider> = match provider_name {
                "tavily" => Arc::new(TavilySearcher::new(&key)),
                other => return Err(anyhow!("Unknown search provider: {other}")),
            };
            // Runtime-keyed instances are never shared.
            if api_key.is_some() {
                return Ok(provider);
            }
            self.singletons
                .lock()
                .expect("singleton cache poisoned")
                .insert(provider_name.to_string(), provider.clone());
            return Ok(provider);
        }

        if let Some(existing) = self
            .singletons
            .lock()
            .expect("singleton cache poisoned")
            .get(provider_name)
        {
            return Ok(existing.clone());
        }
        let provider: Arc<dyn SearchProvider> = match provider_name {
            "searxng" => Arc::new(SearxSearcher::new(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or("http://localhost:8888"),
            )),
            other => return Err(anyhow!("Unknown search provider: {other}")),
        };
        self.singletons
            .lock()
            .expect("singleton cache poisoned")
            .insert(provider_name.to_string(), provider.clone());
        Ok(provider)
    }

    /// Local/free first, then paid providers in insertion order.
    pub fn get_default_provider(
        &self,
        api_keys: Option<&HashMap<String, String>>,
    ) -> Option<Arc<dyn SearchProvider>> {
        for config in &self.configs {
            let key = api_keys.and_then(|k| k.get(&config.name)).map(String::as_str);
            if config.requires_api_key && key.is_none() && config.api_key.is_none() {
                continue;
            }
            if let Ok(provider) = self.create_provider(&config.name, key) {
                return Some(provider);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefers_local() {
        let registry = SearchProviderRegistryService::with_defaults(
            Some("http://localhost:8888".into()),
            Some("tvly-key".into()),
        );
        let provider = registry.get_default_provider(None).unwrap();
        assert_eq!(provider.name(), "searxng");
    }

    #[test]
    fn test_paid_fallback_when_no_local() {
        let registry =
            SearchProviderRegistryService::with_defaults(None, Some("tvly-key".into()));
        let provider = registry.get_default_provider(None).unwrap();
        assert_eq!(provider.name(), "tavily");
    }

    #[test]
    fn test_no_providers_available() {
        let registry = SearchProviderRegistryService::with_defaults(None, None);
        assert!(registry.get_default_provider(None).is_none());
    }
}
