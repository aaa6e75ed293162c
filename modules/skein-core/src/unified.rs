//! Descriptive catalog of every provider across all capabilities, for UI
//! listings. This registry carries metadata only; the per-capability
//! registries are the operational ones.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    Language,
    Embedding,
    Search,
    Geocoding,
    Scraping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub capability: ProviderCapability,
    pub requires_api_key: bool,
    pub is_local: bool,
    pub is_oss: bool,
    pub is_free: bool,
    pub rate_limited: bool,
}

pub struct UnifiedProviderRegistry {
    providers: Vec<ProviderMetadata>,
}

impl UnifiedProviderRegistry {
    pub fn new() -> Self {
        let entry = |id: &str,
                     name: &str,
                     capability: ProviderCapability,
                     requires_api_key: bool,
                     is_local: bool,
                     is_oss: bool,
                     is_free: bool,
                     rate_limited: bool| ProviderMetadata {
            id: id.to_string(),
            name: name.to_string(),
            capability,
            requires_api_key,
            is_local,
            is_oss,
            is_free,
            rate_limited,
        };

        use ProviderCapability::*;
        let providers = vec![
            // Language models
            entry("ollama", "Ollama", Language, false, true, true, true, false),
            entry("openai", "OpenAI", Language, true, false, false, false, true),
            entry("anthropic", "Anthropic", Language, true, false, false, false, true),
            entry("gemini", "Google Gemini", Language, true, false, false, false, true),
            // Embeddings
            entry("ollama-embeddings", "Ollama Embeddings", Embedding, false, true, true, true, false),
            entry("openai-embeddings", "OpenAI Embeddings", Embedding, true, false, false, false, true),
            entry("voyage", "Voyage AI", Embedding, true, false, false, false, true),
            entry("jina", "Jina AI", Embedding, true, false, false, false, true),
            // Search
            entry("searxng", "SearXNG", Search, false, true, true, true, false),
            entry("tavily", "Tavily", Search, true, false, false, false, true),
            // Geocoding
            entry("nominatim-local", "Nominatim (local)", Geocoding, false, true, true, true, false),
            entry("nominatim-api", "Nominatim (OSM)", Geocoding, false, false, true, true, true),
            entry("mapbox", "Mapbox", Geocoding, true, false, false, false, true),
            // Scraping
            entry("http-scraper", "HTTP Scraper", Scraping, false, true, true, true, false),
        ];

        Self { providers }
    }

    pub fn all_providers(&self) -> &[ProviderMetadata] {
        &self.providers
    }

    pub fn providers_by_capability(
        &self,
        capability: ProviderCapability,
    ) -> Vec<&ProviderMetadata> {
        self.providers
            .iter()
            .filter(|p| p.capability == capability)
            .collect()
    }

    pub fn get_provider(&self, provider_id: &str) -> Option<&ProviderMetadata> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    pub fn requires_api_key(&self, provider_id: &str) -> bool {
        self.get_provider(provider_id)
            .map(|p| p.requires_api_key)
            .unwrap_or(false)
    }
}

impl Default for UnifiedProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let registry = UnifiedProviderRegistry::new();
        assert!(registry.requires_api_key("anthropic"));
        assert!(!registry.requires_api_key("ollama"));
        assert!(registry.get_provider("does-not-exist").is_none());

        let search = registry.providers_by_capability(ProviderCapability::Search);
        assert_eq!(search.len(), 2);
        // Local/free providers come first in the listing.
        assert_eq!(search[0].id, "searxng");
    }
}
