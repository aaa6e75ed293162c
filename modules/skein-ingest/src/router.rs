//! The ingestion router: one heterogeneous locator in, assets out.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use skein_common::{Asset, Result, SkeinError};
use skein_store::{BlobStorage, Store};

use crate::options::IngestOptions;
use crate::processors::strategy::ProcessingStrategy;
use crate::processors::{process_content, ProcessorContext, ProcessorRegistry};
use crate::scrape::ScrapingProvider;
use crate::search::SearchProviderRegistryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    FileUpload,
    TextContent,
    SearchQuery,
    RssFeed,
    DirectFile,
    WebPage,
    UrlList,
    SiteDiscovery,
}

/// One heterogeneous input to `ingest`.
#[derive(Debug, Clone)]
pub enum IngestLocator {
    /// An uploaded file.
    File { filename: String, bytes: Vec<u8> },
    /// A list of URLs.
    Urls(Vec<String>),
    /// Pasted text.
    Text(String),
    /// Any other string: URL variants or a search query, auto-detected.
    Query(String),
}

const DIRECT_FILE_EXTENSIONS: [&str; 9] = [
    ".pdf", ".doc", ".docx", ".zip", ".tar", ".gz", ".csv", ".xlsx", ".xls",
];
const RSS_PATH_PATTERNS: [&str; 4] = [".rss", ".xml", "/feed/", "/feeds/"];

/// Source-type detection; first match wins.
pub fn detect_source_type(locator: &IngestLocator, force_discovery: bool) -> SourceType {
    match locator {
        IngestLocator::File { .. } => SourceType::FileUpload,
        IngestLocator::Urls(_) => SourceType::UrlList,
        IngestLocator::Text(_) => SourceType::TextContent,
        IngestLocator::Query(raw) => {
            if raw.starts_with("http://") || raw.starts_with("https://") {
                if force_discovery {
                    return SourceType::SiteDiscovery;
                }
                let path = Url::parse(raw)
                    .map(|u| u.path().to_lowercase())
                    .unwrap_or_default();

                if RSS_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
                    return SourceType::RssFeed;
                }
                if DIRECT_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
                    return SourceType::DirectFile;
                }
                if path == "/" || path.is_empty() || raw.to_lowercase().contains("discover") {
                    return SourceType::SiteDiscovery;
                }
                SourceType::WebPage
            } else {
                SourceType::SearchQuery
            }
        }
    }
}

pub struct IngestionRouter {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) storage: Arc<dyn BlobStorage>,
    pub(crate) scraper: Arc<dyn ScrapingProvider>,
    pub(crate) search: Arc<SearchProviderRegistryService>,
    pub(crate) processors: Arc<ProcessorRegistry>,
    pub(crate) strategy: ProcessingStrategy,
    pub(crate) http: reqwest::Client,
}

impl IngestionRouter {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn BlobStorage>,
        scraper: Arc<dyn ScrapingProvider>,
        search: Arc<SearchProviderRegistryService>,
        processors: Arc<ProcessorRegistry>,
        strategy: ProcessingStrategy,
    ) -> Self {
        Self {
            store,
            storage,
            scraper,
            search,
            processors,
            strategy,
            http: reqwest::Client::new(),
        }
    }

    /// Unified content ingestion: detects the source type, routes to the
    /// matching handler, and links the results into a bundle if asked.
    pub async fn ingest(
        &self,
        locator: IngestLocator,
        infospace_id: i64,
        user_id: i64,
        title: Option<String>,
        bundle_id: Option<i64>,
        options: IngestOptions,
    ) -> Result<Vec<Asset>> {
        if !self
            .store
            .check_infospace_access(infospace_id, user_id)
            .await?
        {
            return Err(SkeinError::AccessDenied(format!(
                "user {user_id} has no access to infospace {infospace_id}"
            )));
        }

        let source_type = detect_source_type(&locator, options.force_discovery);
        info!(?source_type, "detected source type");

        let assets = match (source_type, locator) {
            (SourceType::FileUpload, IngestLocator::File { filename, bytes }) => {
                vec![
                    self.handle_file_upload(filename, bytes, infospace_id, user_id, title, &options)
                        .await?,
                ]
            }
            (SourceType::TextContent, IngestLocator::Text(text)) => {
                vec![
                    self.handle_text_content(text, infospace_id, user_id, title, &options)
                        .await?,
                ]
            }
            (SourceType::UrlList, IngestLocator::Urls(urls)) => {
                self.handle_url_list(urls, infospace_id, user_id, &options)
                    .await?
            }
            (SourceType::RssFeed, IngestLocator::Query(url)) => {
                self.handle_rss_feed(url, infospace_id, user_id, &options)
                    .await?
            }
            (SourceType::DirectFile, IngestLocator::Query(url)) => {
                vec![
                    self.handle_direct_file_url(url, infospace_id, user_id, title, &options)
                        .await?,
                ]
            }
            (SourceType::WebPage, IngestLocator::Query(url)) => {
                vec![
                    self.handle_web_page(url, infospace_id, user_id, title, &options)
                        .await?,
                ]
            }
            (SourceType::SiteDiscovery, IngestLocator::Query(url)) => {
                self.handle_site_discovery(url, infospace_id, user_id, &options)
                    .await?
            }
            (SourceType::SearchQuery, IngestLocator::Query(query)) => {
                self.handle_search_query(query, infospace_id, user_id, &options)
                    .await?
            }
            (source_type, _) => {
                return Err(SkeinError::Validation(format!(
                    "locator does not match detected source type {source_type:?}"
                )))
            }
        };

        if let Some(bundle_id) = bundle_id {
            let mut added = 0;
            for asset in &assets {
                if self.store.link_asset_to_bundle(bundle_id, asset.id).await? {
                    added += 1;
                }
            }
            info!(bundle_id, added, "linked ingested assets to bundle");
        }

        Ok(assets)
    }

    pub(crate) fn processor_context(&self, options: &IngestOptions) -> ProcessorContext {
        ProcessorContext {
            store: self.store.clone(),
            storage: self.storage.clone(),
            scraper: Some(self.scraper.clone()),
            options: options.clone(),
        }
    }

    /// Run processing for a freshly created asset; failures are recorded
    /// on the asset and logged, never propagated to the ingest result.
    /// Kinds without a registered processor (e.g. MBOX for now) are left
    /// pending.
    pub(crate) async fn process_new_asset(&self, asset: &mut Asset, options: &IngestOptions) {
        if self.processors.get_processor(asset).is_none() {
            warn!(asset_id = asset.id, kind = %asset.kind, "no processor registered, leaving pending");
            return;
        }
        let ctx = self.processor_context(options);
        if let Err(e) = process_content(asset, &self.processors, &ctx).await {
            warn!(asset_id = asset.id, error = %e, "immediate processing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(raw: &str) -> IngestLocator {
        IngestLocator::Query(raw.to_string())
    }

    #[test]
    fn test_detect_file_and_lists() {
        assert_eq!(
            detect_source_type(
                &IngestLocator::File {
                    filename: "a.pdf".into(),
                    bytes: vec![]
                },
                false
            ),
            SourceType::FileUpload
        );
        assert_eq!(
            detect_source_type(&IngestLocator::Urls(vec!["https://a".into()]), false),
            SourceType::UrlList
        );
        assert_eq!(
            detect_source_type(&IngestLocator::Text("hello".into()), false),
            SourceType::TextContent
        );
    }

    #[test]
    fn test_detect_rss() {
        assert_eq!(
            detect_source_type(&query("https://example.com/news.rss"), false),
            SourceType::RssFeed
        );
        assert_eq!(
            detect_source_type(&query("https://example.com/feed.xml"), false),
            SourceType::RssFeed
        );
        assert_eq!(
            detect_source_type(&query("https://example.com/feeds/world"), false),
            SourceType::RssFeed
        );
    }

    #[test]
    fn test_detect_direct_file() {
        assert_eq!(
            detect_source_type(&query("https://example.com/report.pdf"), false),
            SourceType::DirectFile
        );
        assert_eq!(
            detect_source_type(&query("https://example.com/data.xlsx"), false),
            SourceType::DirectFile
        );
    }

    #[test]
    fn test_detect_site_discovery() {
        assert_eq!(
            detect_source_type(&query("https://example.com/"), false),
            SourceType::SiteDiscovery
        );
        assert_eq!(
            detect_source_type(&query("https://example.com/discover/sources"), false),
            SourceType::SiteDiscovery
        );
        // Explicit option overrides heuristics.
        assert_eq!(
            detect_source_type(&query("https://example.com/article"), true),
            SourceType::SiteDiscovery
        );
    }

    #[test]
    fn test_detect_web_and_search() {
        assert_eq!(
            detect_source_type(&query("https://example.com/2024/story"), false),
            SourceType::WebPage
        );
        assert_eq!(
            detect_source_type(&query("climate policy news"), false),
            SourceType::SearchQuery
        );
    }
}
