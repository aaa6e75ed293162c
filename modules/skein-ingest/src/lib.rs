//! Ingestion: source-type detection, per-type handlers, and the processor
//! pipeline that materializes child assets (CSV rows, Excel sheets, PDF
//! pages, web images).

pub mod content;
pub mod feeds;
mod handlers;
pub mod options;
pub mod processors;
pub mod router;
pub mod scrape;
pub mod search;

pub use content::AssetContentService;
pub use options::IngestOptions;
pub use processors::{
    detect_asset_kind_from_extension, needs_processing, register_processors, process_content,
    Processor, ProcessorContext, ProcessorRegistry,
};
pub use processors::strategy::ProcessingStrategy;
pub use router::{detect_source_type, IngestLocator, IngestionRouter, SourceType};
pub use scrape::{HttpScraper, ScrapedPage, ScrapingProvider, SourceAnalysis};
pub use search::{SearchProvider, SearchProviderRegistryService, SearchResult};

use chrono::{DateTime, Utc};

/// Lenient date parsing for feed/scrape timestamps: RFC 3339, RFC 2822,
/// then a couple of date-only shapes.
pub(crate) fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_timestamp() {
        assert!(parse_event_timestamp("2024-03-01T12:30:00Z").is_some());
        assert!(parse_event_timestamp("Fri, 01 Mar 2024 12:30:00 +0000").is_some());
        assert!(parse_event_timestamp("2024-03-01").is_some());
        assert!(parse_event_timestamp("not a date").is_none());
        assert!(parse_event_timestamp("").is_none());
    }
}
