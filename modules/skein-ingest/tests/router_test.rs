//! End-to-end ingestion through the router with scripted providers.

use std::sync::Arc;

use async_trait::async_trait;

use skein_common::{AssetKind, ProcessingStatus, SkeinError};
use skein_ingest::processors::strategy::ProcessingStrategy;
use skein_ingest::{
    register_processors, IngestLocator, IngestOptions, IngestionRouter, ProcessorRegistry,
    ScrapedPage, ScrapingProvider, SearchProviderRegistryService,
};
use skein_store::{MemoryStorage, MemoryStore, Store};

struct ScriptedScraper;

#[async_trait]
impl ScrapingProvider for ScriptedScraper {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn scrape_url(&self, url: &str, _timeout_secs: u64) -> anyhow::Result<ScrapedPage> {
        if url.contains("broken") {
            anyhow::bail!("connection refused");
        }
        Ok(ScrapedPage {
            url: url.to_string(),
            title: Some(format!("Title for {url}")),
            text_content: Some(format!("Body text of {url}")),
            publication_date: Some("2024-03-01T09:00:00Z".to_string()),
            top_image: Some("https://cdn.example.com/hero.jpg".to_string()),
            images: vec![
                "https://cdn.example.com/hero.jpg".to_string(),
                "https://cdn.example.com/logo.png".to_string(),
                "https://cdn.example.com/photo.jpg".to_string(),
            ],
            summary: Some("summary".to_string()),
            authors: vec![],
            keywords: vec![],
            scraped_at: Some("2024-03-01T10:00:00Z".to_string()),
            scraping_method: Some("scripted".to_string()),
        })
    }

    async fn discover_feeds(&self, _base_url: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    router: IngestionRouter,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.grant_access(1, 1);
    let storage = Arc::new(MemoryStorage::new());
    let mut registry = ProcessorRegistry::new();
    register_processors(&mut registry);

    let router = IngestionRouter::new(
        store.clone(),
        storage,
        Arc::new(ScriptedScraper),
        Arc::new(SearchProviderRegistryService::with_defaults(None, None)),
        Arc::new(registry),
        ProcessingStrategy::default(),
    );
    Fixture { store, router }
}

#[tokio::test]
async fn test_access_denied() {
    let f = fixture();
    let err = f
        .router
        .ingest(
            IngestLocator::Text("hello".into()),
            2,
            1,
            None,
            None,
            IngestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SkeinError::AccessDenied(_)));
}

#[tokio::test]
async fn test_csv_upload_processes_rows() {
    let f = fixture();
    let assets = f
        .router
        .ingest(
            IngestLocator::File {
                filename: "people.csv".into(),
                bytes: b"name,age\nAda,36\nGrace,85\n".to_vec(),
            },
            1,
            1,
            None,
            None,
            IngestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(assets.len(), 1);
    let parent = f.store.get_asset(assets[0].id).await.unwrap().unwrap();
    assert_eq!(parent.kind, AssetKind::Csv);
    assert_eq!(parent.processing_status, ProcessingStatus::Ready);
    assert_eq!(parent.source_metadata["rows_processed"], 2);
    assert_eq!(
        parent.source_metadata["ingestion_method"],
        "file_upload"
    );
    assert!(parent.content_hash.is_some());

    let rows = f.store.list_children(parent.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].text_content.as_deref(), Some("Ada | 36"));
}

#[tokio::test]
async fn test_web_page_scrape_and_images() {
    let f = fixture();
    let assets = f
        .router
        .ingest(
            IngestLocator::Query("https://example.com/2024/story".into()),
            1,
            1,
            None,
            None,
            IngestOptions::default(),
        )
        .await
        .unwrap();

    let asset = f.store.get_asset(assets[0].id).await.unwrap().unwrap();
    assert_eq!(asset.kind, AssetKind::Web);
    assert_eq!(asset.title, "Title for https://example.com/2024/story");
    assert!(asset.event_timestamp.is_some());
    assert_eq!(asset.processing_status, ProcessingStatus::Ready);

    // Featured image plus the one content image; the logo is filtered.
    let images = f.store.list_children(asset.id).await.unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].part_index, Some(0));
    assert_eq!(
        images[0].source_metadata["image_role"],
        serde_json::json!("featured")
    );
    assert_eq!(images[1].part_index, Some(1));
}

#[tokio::test]
async fn test_bulk_url_list_skips_failures() {
    let f = fixture();
    let urls: Vec<String> = vec![
        "https://example.com/a".into(),
        "https://example.com/broken".into(),
        "https://example.com/b".into(),
        "https://example.com/c".into(),
        "https://example.com/d".into(),
    ];
    let mut options = IngestOptions::default();
    options.create_image_assets = false;

    let assets = f
        .router
        .ingest(
            IngestLocator::Urls(urls),
            1,
            1,
            None,
            None,
            options,
        )
        .await
        .unwrap();

    // The broken URL is logged and skipped; the rest land in order.
    assert_eq!(assets.len(), 4);
    assert_eq!(assets[0].source_metadata["batch_index"], 0);
    assert_eq!(assets[1].source_metadata["batch_index"], 2);
    assert_eq!(
        assets[0].source_metadata["ingestion_method"],
        "bulk_url_scraping"
    );
}

#[tokio::test]
async fn test_bundle_linking_counts_new_links_once() {
    let f = fixture();
    let bundle = f
        .store
        .create_bundle(skein_common::BundleCreate {
            infospace_id: 1,
            user_id: 1,
            name: "picks".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let options = IngestOptions::default();
    f.router
        .ingest(
            IngestLocator::Text("note one".into()),
            1,
            1,
            None,
            Some(bundle.id),
            options.clone(),
        )
        .await
        .unwrap();
    f.router
        .ingest(
            IngestLocator::Text("note two".into()),
            1,
            1,
            None,
            Some(bundle.id),
            options,
        )
        .await
        .unwrap();

    let bundle = f.store.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(bundle.asset_count, 2);
}
