use std::env;

/// Application configuration loaded from environment variables.
///
/// Provider API keys are optional here: registries accept runtime keys
/// per request, and environment keys act as the fallback.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Persistence
    pub database_url: Option<String>,
    pub storage_root: String,

    // Identity of this deployment, stamped into every exported package.
    pub instance_id: String,

    // Key-less local providers
    pub ollama_base_url: String,
    pub nominatim_base_url: String,
    pub searxng_base_url: Option<String>,

    // Provider API keys (runtime keys override these)
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub jina_api_key: Option<String>,
    pub mapbox_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data/blobs".to_string()),
            instance_id: env::var("INSTANCE_ID").unwrap_or_else(|_| "unknown_instance".to_string()),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            nominatim_base_url: env::var("NOMINATIM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            searxng_base_url: env::var("SEARXNG_BASE_URL").ok(),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            anthropic_api_key: non_empty(env::var("ANTHROPIC_API_KEY").ok()),
            gemini_api_key: non_empty(env::var("GEMINI_API_KEY").ok()),
            voyage_api_key: non_empty(env::var("VOYAGE_API_KEY").ok()),
            jina_api_key: non_empty(env::var("JINA_API_KEY").ok()),
            mapbox_api_key: non_empty(env::var("MAPBOX_API_KEY").ok()),
            tavily_api_key: non_empty(env::var("TAVILY_API_KEY").ok()),
        }
    }

    /// Log which keys are present without leaking their values.
    pub fn log_redacted(&self) {
        let keys = [
            ("OPENAI_API_KEY", &self.openai_api_key),
            ("ANTHROPIC_API_KEY", &self.anthropic_api_key),
            ("GEMINI_API_KEY", &self.gemini_api_key),
            ("VOYAGE_API_KEY", &self.voyage_api_key),
            ("JINA_API_KEY", &self.jina_api_key),
            ("MAPBOX_API_KEY", &self.mapbox_api_key),
            ("TAVILY_API_KEY", &self.tavily_api_key),
        ];
        for (name, value) in keys {
            match value {
                Some(v) => tracing::info!("{name} = ({} chars)", v.len()),
                None => tracing::info!("{name} = (unset)"),
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            storage_root: "./data/blobs".to_string(),
            instance_id: "unknown_instance".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            nominatim_base_url: "http://localhost:8080".to_string(),
            searxng_base_url: None,
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
            voyage_api_key: None,
            jina_api_key: None,
            mapbox_api_key: None,
            tavily_api_key: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
