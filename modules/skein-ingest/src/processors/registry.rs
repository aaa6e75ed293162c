//! Processor registry plus the canonical content-type configuration:
//! extension-to-kind mapping and which kinds need processing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use skein_common::{Asset, AssetKind};

use super::csv::CsvProcessor;
use super::excel::ExcelProcessor;
use super::pdf::PdfProcessor;
use super::web::WebProcessor;
use super::Processor;

/// Kinds that have a processor and need content processing.
pub const PROCESSABLE_KINDS: [AssetKind; 4] = [
    AssetKind::Csv,
    AssetKind::Pdf,
    AssetKind::Web,
    AssetKind::Mbox,
];

/// Canonical extension-to-kind mapping. Unknown extensions map to FILE.
pub fn detect_asset_kind_from_extension(file_ext: &str) -> AssetKind {
    let ext = file_ext.trim().to_lowercase();
    let ext = ext.strip_prefix('.').unwrap_or(&ext);
    match ext {
        "pdf" => AssetKind::Pdf,
        "txt" | "md" => AssetKind::Text,
        "doc" | "docx" | "json" => AssetKind::File,
        // Excel is treated as CSV kind; the extension override picks the
        // Excel processor.
        "csv" | "xlsx" | "xls" => AssetKind::Csv,
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg" => AssetKind::Image,
        "mp4" | "avi" | "mov" | "webm" => AssetKind::Video,
        "mp3" | "wav" | "ogg" => AssetKind::Audio,
        "mbox" => AssetKind::Mbox,
        "eml" => AssetKind::Email,
        "zip" | "tar" | "gz" => AssetKind::File,
        _ => AssetKind::File,
    }
}

pub fn needs_processing(kind: AssetKind) -> bool {
    kind.needs_processing()
}

/// Maps asset kinds and file extensions to processors. Extension matches
/// are more specific and win over kind matches.
#[derive(Default)]
pub struct ProcessorRegistry {
    kind_processors: HashMap<AssetKind, Arc<dyn Processor>>,
    extension_processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_by_kind(&mut self, kind: AssetKind, processor: Arc<dyn Processor>) {
        debug!(processor = processor.name(), kind = %kind, "registered processor by kind");
        self.kind_processors.insert(kind, processor);
    }

    pub fn register_by_extension(&mut self, extension: &str, processor: Arc<dyn Processor>) {
        let ext = extension.trim().to_lowercase();
        let ext = if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        };
        debug!(processor = processor.name(), extension = %ext, "registered processor by extension");
        self.extension_processors.insert(ext, processor);
    }

    /// Priority: blob-path extension match, then asset kind.
    pub fn get_processor(&self, asset: &Asset) -> Option<Arc<dyn Processor>> {
        if let Some(blob_path) = &asset.blob_path {
            if let Some(ext) = std::path::Path::new(blob_path)
                .extension()
                .and_then(|e| e.to_str())
            {
                let key = format!(".{}", ext.to_lowercase());
                if let Some(processor) = self.extension_processors.get(&key) {
                    return Some(processor.clone());
                }
            }
        }
        self.kind_processors.get(&asset.kind).cloned()
    }

    /// List registrations for debugging.
    pub fn list_processors(&self) -> (Vec<(String, &'static str)>, Vec<(String, &'static str)>) {
        let by_kind = self
            .kind_processors
            .iter()
            .map(|(k, p)| (k.to_string(), p.name()))
            .collect();
        let by_extension = self
            .extension_processors
            .iter()
            .map(|(e, p)| (e.clone(), p.name()))
            .collect();
        (by_kind, by_extension)
    }
}

/// Register the built-in processors. Called once by application bootstrap;
/// there is no import-time magic.
pub fn register_processors(registry: &mut ProcessorRegistry) {
    registry.register_by_kind(AssetKind::Csv, Arc::new(CsvProcessor));
    registry.register_by_kind(AssetKind::Pdf, Arc::new(PdfProcessor));
    registry.register_by_kind(AssetKind::Web, Arc::new(WebProcessor));

    // Extension overrides for special cases.
    registry.register_by_extension(".xlsx", Arc::new(ExcelProcessor));
    registry.register_by_extension(".xls", Arc::new(ExcelProcessor));

    info!("registered all built-in processors");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skein_common::{Metadata, ProcessingStatus};

    fn asset(kind: AssetKind, blob_path: Option<&str>) -> Asset {
        Asset {
            id: 1,
            uuid: uuid::Uuid::new_v4(),
            infospace_id: 1,
            user_id: 1,
            title: "t".into(),
            kind,
            parent_asset_id: None,
            source_id: None,
            part_index: None,
            blob_path: blob_path.map(String::from),
            text_content: None,
            source_identifier: None,
            source_metadata: Metadata::new(),
            event_timestamp: None,
            content_hash: None,
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            imported_from_uuid: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(detect_asset_kind_from_extension(".pdf"), AssetKind::Pdf);
        assert_eq!(detect_asset_kind_from_extension("xlsx"), AssetKind::Csv);
        assert_eq!(detect_asset_kind_from_extension(".md"), AssetKind::Text);
        assert_eq!(detect_asset_kind_from_extension(".eml"), AssetKind::Email);
        assert_eq!(detect_asset_kind_from_extension(".wat"), AssetKind::File);
        assert_eq!(detect_asset_kind_from_extension(""), AssetKind::File);
    }

    #[test]
    fn test_extension_overrides_kind() {
        let mut registry = ProcessorRegistry::new();
        register_processors(&mut registry);

        // .xlsx blob wins over the CSV kind registration.
        let excel = asset(AssetKind::Csv, Some("user_1/abc.xlsx"));
        assert_eq!(registry.get_processor(&excel).unwrap().name(), "ExcelProcessor");

        let csv = asset(AssetKind::Csv, Some("user_1/abc.csv"));
        assert_eq!(registry.get_processor(&csv).unwrap().name(), "CsvProcessor");

        let web = asset(AssetKind::Web, None);
        assert_eq!(registry.get_processor(&web).unwrap().name(), "WebProcessor");

        let image = asset(AssetKind::Image, None);
        assert!(registry.get_processor(&image).is_none());
    }
}
