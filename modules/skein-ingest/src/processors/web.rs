//! Web processor: scrape the page, update the parent in place, and
//! create IMAGE children for the featured and content images.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use skein_common::{Asset, AssetCreate, AssetKind, Result, SkeinError};
use skein_store::Store;

use crate::parse_event_timestamp;
use crate::scrape::ScrapedPage;

use super::{Processor, ProcessorContext};

/// URL tokens that mark chrome/tracking imagery rather than content.
const SKIP_PATTERNS: [&str; 18] = [
    "logo",
    "icon",
    "avatar",
    "button",
    "badge",
    "banner",
    "header",
    "footer",
    "nav",
    "menu",
    "ad",
    "advertisement",
    "twitter.gif",
    "facebook.gif",
    "pixel.gif",
    "1x1.gif",
    "sprite",
    "tracking",
];

const SKIP_DIMENSIONS: [&str; 3] = ["16x16", "32x32", "64x64"];

pub struct WebProcessor;

#[async_trait]
impl Processor for WebProcessor {
    fn name(&self) -> &'static str {
        "WebProcessor"
    }

    fn can_process(&self, asset: &Asset) -> bool {
        asset.kind == AssetKind::Web && asset.source_identifier.is_some()
    }

    async fn process(&self, asset: &mut Asset, ctx: &ProcessorContext) -> Result<Vec<Asset>> {
        if !self.can_process(asset) {
            return Err(SkeinError::Processing(format!(
                "Cannot process asset {} as web page",
                asset.id
            )));
        }
        let scraper = ctx
            .scraper
            .as_ref()
            .ok_or_else(|| SkeinError::Processing("Scraping provider not available".into()))?;

        let url = asset.source_identifier.clone().expect("checked by can_process");
        let page = scraper
            .scrape_url(&url, ctx.options.timeout_secs)
            .await
            .map_err(|e| SkeinError::Processing(e.to_string()))?;

        let text_content = page
            .text_content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SkeinError::Processing("No content could be scraped from URL".into())
            })?
            .to_string();

        asset.text_content = Some(text_content.clone());
        if let Some(title) = page.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            info!(asset_id = asset.id, title, "updated asset title from scrape");
            asset.title = title.to_string();
        }
        if let Some(raw) = &page.publication_date {
            match parse_event_timestamp(raw) {
                Some(ts) => asset.event_timestamp = Some(ts),
                None => warn!(raw, "could not parse publication date"),
            }
        }
        asset.content_hash = Some(skein_common::content_hash(text_content.as_bytes()));

        let scraped_at = Utc::now().to_rfc3339();
        asset
            .source_metadata
            .insert("scraped_at".into(), serde_json::json!(scraped_at));
        asset
            .source_metadata
            .insert("scraped_title".into(), serde_json::json!(page.title));
        asset
            .source_metadata
            .insert("top_image".into(), serde_json::json!(page.top_image));
        asset
            .source_metadata
            .insert("summary".into(), serde_json::json!(page.summary));
        asset.source_metadata.insert(
            "publication_date".into(),
            serde_json::json!(page.publication_date),
        );
        asset.source_metadata.insert(
            "content_length".into(),
            serde_json::json!(text_content.len()),
        );

        let children = create_image_children(
            ctx.store.as_ref(),
            asset,
            &page,
            ctx.options.max_images,
        )
        .await?;

        info!(
            asset_id = asset.id,
            images = children.len(),
            "processed web content"
        );
        Ok(children)
    }
}

/// Featured image at part_index 0, filtered content images after it.
pub(crate) async fn create_image_children(
    store: &dyn Store,
    parent: &Asset,
    page: &ScrapedPage,
    max_images: usize,
) -> Result<Vec<Asset>> {
    let mut children = Vec::new();
    let scraped_at = parent
        .source_metadata
        .get("scraped_at")
        .cloned()
        .unwrap_or_else(|| serde_json::json!(Utc::now().to_rfc3339()));

    let parent_article = serde_json::json!({
        "title": parent.title,
        "url": parent.source_identifier,
        "asset_id": parent.id,
    });

    if let Some(top_image) = &page.top_image {
        let mut create = AssetCreate::new(
            parent.infospace_id,
            parent.user_id,
            format!("Featured: {}", parent.title),
            AssetKind::Image,
        );
        create.parent_asset_id = Some(parent.id);
        create.source_id = parent.source_id;
        create.source_identifier = Some(top_image.clone());
        create.part_index = Some(0);
        create
            .source_metadata
            .insert("image_role".into(), serde_json::json!("featured"));
        create
            .source_metadata
            .insert("image_url".into(), serde_json::json!(top_image));
        create
            .source_metadata
            .insert("parent_article".into(), parent_article.clone());
        create
            .source_metadata
            .insert("scraped_at".into(), scraped_at.clone());
        create
            .source_metadata
            .insert("is_hero_image".into(), serde_json::json!(true));
        children.push(store.create_asset(create).await?);
    }

    let content_images = filter_content_images(&page.images, page.top_image.as_deref());
    let start_index: i32 = if page.top_image.is_some() { 1 } else { 0 };

    for (idx, image_url) in content_images.iter().take(max_images).enumerate() {
        let part_index = start_index + idx as i32;
        let mut create = AssetCreate::new(
            parent.infospace_id,
            parent.user_id,
            format!("Image {}: {}", part_index + 1, parent.title),
            AssetKind::Image,
        );
        create.parent_asset_id = Some(parent.id);
        create.source_id = parent.source_id;
        create.source_identifier = Some(image_url.clone());
        create.part_index = Some(part_index);
        create
            .source_metadata
            .insert("image_role".into(), serde_json::json!("content"));
        create
            .source_metadata
            .insert("image_url".into(), serde_json::json!(image_url));
        create
            .source_metadata
            .insert("parent_article".into(), parent_article.clone());
        create
            .source_metadata
            .insert("content_index".into(), serde_json::json!(idx));
        create
            .source_metadata
            .insert("scraped_at".into(), scraped_at.clone());
        children.push(store.create_asset(create).await?);
    }

    Ok(children)
}

/// Drop duplicates of the featured image, chrome/tracking imagery, and
/// tiny fixed-size icons.
pub(crate) fn filter_content_images(images: &[String], top_image: Option<&str>) -> Vec<String> {
    let mut seen: Vec<&str> = top_image.into_iter().collect();
    let mut content_images = Vec::new();

    for image_url in images {
        if seen.contains(&image_url.as_str()) {
            continue;
        }
        let lowered = image_url.to_lowercase();
        if SKIP_PATTERNS.iter().any(|p| lowered.contains(p)) {
            continue;
        }
        if SKIP_DIMENSIONS.iter().any(|d| image_url.contains(d)) {
            continue;
        }
        content_images.push(image_url.clone());
        seen.push(image_url.as_str());
    }

    content_images
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_drops_top_image_duplicate() {
        let images = urls(&[
            "https://cdn.example.com/hero.jpg",
            "https://cdn.example.com/photo1.jpg",
        ]);
        let filtered = filter_content_images(&images, Some("https://cdn.example.com/hero.jpg"));
        assert_eq!(filtered, urls(&["https://cdn.example.com/photo1.jpg"]));
    }

    #[test]
    fn test_filter_drops_chrome_and_tracking() {
        let images = urls(&[
            "https://cdn.example.com/logo.png",
            "https://cdn.example.com/site-icon.svg",
            "https://cdn.example.com/pixel.gif",
            "https://cdn.example.com/story-photo.jpg",
            "https://ads.example.com/advertisement.jpg",
        ]);
        let filtered = filter_content_images(&images, None);
        assert_eq!(filtered, urls(&["https://cdn.example.com/story-photo.jpg"]));
    }

    #[test]
    fn test_filter_drops_small_dimensions() {
        let images = urls(&[
            "https://cdn.example.com/thumb-16x16.png",
            "https://cdn.example.com/thumb-32x32.png",
            "https://cdn.example.com/photo-640x480.jpg",
        ]);
        let filtered = filter_content_images(&images, None);
        assert_eq!(filtered, urls(&["https://cdn.example.com/photo-640x480.jpg"]));
    }

    #[test]
    fn test_filter_dedupes() {
        let images = urls(&[
            "https://cdn.example.com/a.jpg",
            "https://cdn.example.com/a.jpg",
        ]);
        let filtered = filter_content_images(&images, None);
        assert_eq!(filtered.len(), 1);
    }
}
