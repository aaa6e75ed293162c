//! Startup wiring. This is the single place that constructs registries
//! and registers processors.

use std::sync::Arc;

use tracing::info;

use ai_client::{
    EmbeddingProviderConfig, EmbeddingProviderRegistryService, ModelRegistryService,
    ProviderConfig, ProviderKind,
};
use geo_client::GeocodingProviderRegistryService;
use skein_annotate::{AnnotationExecutor, RegistryGenerator, RunService, SchemaService};
use skein_common::{AppConfig, Result, SkeinError};
use skein_ingest::processors::strategy::ProcessingStrategy;
use skein_ingest::{
    register_processors, AssetContentService, HttpScraper, IngestionRouter, ProcessorRegistry,
    ScrapingProvider, SearchProviderRegistryService,
};
use skein_store::{BlobStorage, FsStorage, MemoryStore, PgStore, Store};

use crate::deps::AppDeps;
use crate::unified::UnifiedProviderRegistry;

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn build_model_registry(config: &AppConfig) -> ModelRegistryService {
    let mut registry = ModelRegistryService::new();
    registry.configure_provider(ProviderConfig {
        name: "ollama".into(),
        kind: ProviderKind::Ollama,
        api_key: None,
        base_url: Some(config.ollama_base_url.clone()),
        enabled: true,
    });
    registry.configure_provider(ProviderConfig {
        name: "openai".into(),
        kind: ProviderKind::OpenAi,
        api_key: config.openai_api_key.clone(),
        base_url: None,
        enabled: true,
    });
    registry.configure_provider(ProviderConfig {
        name: "anthropic".into(),
        kind: ProviderKind::Anthropic,
        api_key: config.anthropic_api_key.clone(),
        base_url: None,
        enabled: true,
    });
    registry.configure_provider(ProviderConfig {
        name: "gemini".into(),
        kind: ProviderKind::Gemini,
        api_key: config.gemini_api_key.clone(),
        base_url: None,
        enabled: true,
    });
    registry
}

fn build_embedding_registry(config: &AppConfig) -> EmbeddingProviderRegistryService {
    EmbeddingProviderRegistryService::new(vec![
        EmbeddingProviderConfig {
            name: "ollama".into(),
            requires_api_key: false,
            api_key: None,
            base_url: Some(config.ollama_base_url.clone()),
        },
        EmbeddingProviderConfig {
            name: "openai".into(),
            requires_api_key: true,
            api_key: config.openai_api_key.clone(),
            base_url: None,
        },
        EmbeddingProviderConfig {
            name: "voyage".into(),
            requires_api_key: true,
            api_key: config.voyage_api_key.clone(),
            base_url: None,
        },
        EmbeddingProviderConfig {
            name: "jina".into(),
            requires_api_key: true,
            api_key: config.jina_api_key.clone(),
            base_url: None,
        },
    ])
}

/// Build the full dependency container from configuration.
///
/// The store is Postgres when `DATABASE_URL` is configured, in-memory
/// otherwise (development and tests).
pub async fn build_deps(config: AppConfig) -> Result<AppDeps> {
    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = sqlx::PgPool::connect(database_url)
                .await
                .map_err(|e| SkeinError::Database(e.to_string()))?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            info!("connected to Postgres store");
            Arc::new(store)
        }
        None => {
            info!("no DATABASE_URL, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let storage: Arc<dyn BlobStorage> = Arc::new(FsStorage::new(&config.storage_root));
    let scraper: Arc<dyn ScrapingProvider> = Arc::new(HttpScraper::new());

    let models = Arc::new(build_model_registry(&config));
    models.initialize_providers().await;

    let embeddings = Arc::new(build_embedding_registry(&config));
    let search = Arc::new(SearchProviderRegistryService::with_defaults(
        config.searxng_base_url.clone(),
        config.tavily_api_key.clone(),
    ));
    let geocoding = Arc::new(GeocodingProviderRegistryService::new(
        &config.nominatim_base_url,
        config.mapbox_api_key.clone(),
    ));

    let mut processor_registry = ProcessorRegistry::new();
    register_processors(&mut processor_registry);
    let processors = Arc::new(processor_registry);

    let strategy = ProcessingStrategy::default();

    let router = Arc::new(IngestionRouter::new(
        store.clone(),
        storage.clone(),
        scraper.clone(),
        search.clone(),
        processors.clone(),
        strategy.clone(),
    ));

    let content = Arc::new(AssetContentService::new(
        store.clone(),
        storage.clone(),
        processors.clone(),
        Some(scraper.clone()),
    ));

    let schemas = Arc::new(SchemaService::new(store.clone()));
    let runs = Arc::new(RunService::new(store.clone()));
    let executor = Arc::new(AnnotationExecutor::new(
        store.clone(),
        Arc::new(RegistryGenerator::new(models.clone(), None)),
    ));

    let unified = Arc::new(UnifiedProviderRegistry::new());

    info!(instance_id = %config.instance_id, "application dependencies ready");

    Ok(AppDeps {
        store,
        storage,
        scraper,
        models,
        embeddings,
        search,
        geocoding,
        processors,
        strategy,
        router,
        content,
        schemas,
        runs,
        executor,
        unified,
        config,
    })
}
