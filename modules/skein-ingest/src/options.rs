use serde::{Deserialize, Serialize};

use skein_common::Metadata;

pub const DEFAULT_MAX_ROWS: usize = 50_000;
pub const DEFAULT_MAX_PAGES: usize = 1000;
pub const DEFAULT_MAX_IMAGES: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Knobs recognized by the ingestion router, handlers and processors.
/// Unknown concerns ride along in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Explicit immediate/background choice; `None` lets the processing
    /// strategy decide from kind and file size.
    pub process_immediately: Option<bool>,
    pub scrape_immediately: bool,
    /// RSS entries to take per feed.
    pub max_items: usize,
    /// Site-discovery crawl bounds.
    pub max_depth: usize,
    pub max_urls: usize,
    pub use_bulk_scraping: bool,
    pub max_threads: usize,
    pub create_image_assets: bool,
    pub base_title: Option<String>,
    pub metadata: Metadata,
    /// Overrides URL heuristics and forces site discovery.
    pub force_discovery: bool,

    // Search handler
    pub limit: usize,
    pub scrape_content: bool,

    // Processor knobs
    pub delimiter: Option<char>,
    pub encoding: Option<String>,
    pub skip_rows: usize,
    pub max_rows: usize,
    pub max_pages: usize,
    pub max_images: usize,
    pub timeout_secs: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            process_immediately: None,
            scrape_immediately: true,
            max_items: 50,
            max_depth: 2,
            max_urls: 50,
            use_bulk_scraping: true,
            max_threads: 4,
            create_image_assets: true,
            base_title: None,
            metadata: Metadata::new(),
            force_discovery: false,
            limit: 10,
            scrape_content: true,
            delimiter: None,
            encoding: None,
            skip_rows: 0,
            max_rows: DEFAULT_MAX_ROWS,
            max_pages: DEFAULT_MAX_PAGES,
            max_images: DEFAULT_MAX_IMAGES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}
