use std::sync::Arc;

use ai_client::{EmbeddingProviderRegistryService, ModelRegistryService};
use geo_client::GeocodingProviderRegistryService;
use skein_annotate::{AnnotationExecutor, RunService, SchemaService};
use skein_common::AppConfig;
use skein_ingest::processors::strategy::ProcessingStrategy;
use skein_ingest::{
    AssetContentService, IngestionRouter, ProcessorRegistry, ScrapingProvider,
    SearchProviderRegistryService,
};
use skein_store::{BlobStorage, Store};

use crate::unified::UnifiedProviderRegistry;

/// Central dependency container passed to handlers and workers. All
/// registries are explicit values built once at startup; nothing is
/// registered at import time.
#[derive(Clone)]
pub struct AppDeps {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn BlobStorage>,
    pub scraper: Arc<dyn ScrapingProvider>,
    pub models: Arc<ModelRegistryService>,
    pub embeddings: Arc<EmbeddingProviderRegistryService>,
    pub search: Arc<SearchProviderRegistryService>,
    pub geocoding: Arc<GeocodingProviderRegistryService>,
    pub processors: Arc<ProcessorRegistry>,
    pub strategy: ProcessingStrategy,
    pub router: Arc<IngestionRouter>,
    pub content: Arc<AssetContentService>,
    pub schemas: Arc<SchemaService>,
    pub runs: Arc<RunService>,
    pub executor: Arc<AnnotationExecutor>,
    pub unified: Arc<UnifiedProviderRegistry>,
    pub config: AppConfig,
}

impl AppDeps {
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }
}
