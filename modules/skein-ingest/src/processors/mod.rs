//! Content processors: each one owns the creation of child assets for a
//! given parent kind (CSV rows, Excel sheets, PDF pages, web images).

pub mod csv;
pub mod excel;
pub mod pdf;
pub mod registry;
pub mod strategy;
pub mod web;

pub use registry::{
    detect_asset_kind_from_extension, needs_processing, register_processors, ProcessorRegistry,
    PROCESSABLE_KINDS,
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use skein_common::{Asset, ProcessingStatus, Result, SkeinError};
use skein_store::{BlobStorage, Store};

use crate::options::IngestOptions;
use crate::scrape::ScrapingProvider;

/// Dependencies and configuration handed to processors. Processors create
/// child assets through the store directly.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn BlobStorage>,
    pub scraper: Option<Arc<dyn ScrapingProvider>>,
    pub options: IngestOptions,
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_process(&self, asset: &Asset) -> bool;

    /// Transform the asset: update its text/metadata in place and return
    /// the created child assets.
    async fn process(&self, asset: &mut Asset, ctx: &ProcessorContext) -> Result<Vec<Asset>>;
}

/// Run the matching processor over an asset with full status bookkeeping.
///
/// Existing children are deleted first so reprocessing yields exactly the
/// children of the current source content. On failure the parent is
/// marked FAILED with the error recorded; children created before the
/// failure are kept.
pub async fn process_content(
    asset: &mut Asset,
    registry: &ProcessorRegistry,
    ctx: &ProcessorContext,
) -> Result<Vec<Asset>> {
    let processor = registry.get_processor(asset).ok_or_else(|| {
        SkeinError::Validation(format!(
            "no processor registered for asset {} (kind {})",
            asset.id, asset.kind
        ))
    })?;

    asset.processing_status = ProcessingStatus::Processing;
    asset.processing_error = None;
    ctx.store.update_asset(asset).await?;

    let removed = ctx.store.delete_children(asset.id).await?;
    if removed > 0 {
        info!(asset_id = asset.id, removed, "dropped stale children before reprocessing");
    }

    match processor.process(asset, ctx).await {
        Ok(children) => {
            asset.processing_status = ProcessingStatus::Ready;
            asset.processing_error = None;
            ctx.store.update_asset(asset).await?;
            info!(
                asset_id = asset.id,
                processor = processor.name(),
                children = children.len(),
                "processing complete"
            );
            Ok(children)
        }
        Err(e) => {
            warn!(asset_id = asset.id, processor = processor.name(), error = %e, "processing failed");
            asset.processing_status = ProcessingStatus::Failed;
            asset.processing_error = Some(e.to_string());
            ctx.store.update_asset(asset).await?;
            Err(e)
        }
    }
}
