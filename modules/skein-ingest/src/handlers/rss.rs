//! RSS feed handler: parent WEB asset for the feed, one child per entry.

use chrono::Utc;
use tracing::{error, info};

use skein_common::{Asset, AssetCreate, AssetKind, Result};

use crate::feeds::{FeedEntry, FeedService};
use crate::options::IngestOptions;
use crate::processors::web::create_image_children;
use crate::router::IngestionRouter;

impl IngestionRouter {
    pub(crate) async fn handle_rss_feed(
        &self,
        feed_url: String,
        infospace_id: i64,
        user_id: i64,
        options: &IngestOptions,
    ) -> Result<Vec<Asset>> {
        let feed = FeedService::new().fetch(&feed_url).await?;

        let feed_title = feed.title.clone().unwrap_or_else(|| "RSS Feed".to_string());
        let mut parent_create = AssetCreate::new(
            infospace_id,
            user_id,
            format!("RSS Feed: {feed_title}"),
            AssetKind::Web,
        );
        parent_create.source_identifier = Some(feed_url.clone());
        parent_create.text_content = feed.description.clone();
        parent_create
            .source_metadata
            .insert("feed_title".into(), serde_json::json!(feed_title));
        parent_create
            .source_metadata
            .insert("feed_url".into(), serde_json::json!(feed_url));
        parent_create
            .source_metadata
            .insert("feed_description".into(), serde_json::json!(feed.description));
        parent_create
            .source_metadata
            .insert("feed_language".into(), serde_json::json!(feed.language));
        parent_create
            .source_metadata
            .insert("total_entries".into(), serde_json::json!(feed.total_entries));
        parent_create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        parent_create.source_metadata.insert(
            "ingestion_method".into(),
            serde_json::json!("rss_processing"),
        );
        let parent = self.store.create_asset(parent_create).await?;

        let entries: Vec<FeedEntry> =
            feed.entries.into_iter().take(options.max_items).collect();
        let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();

        let mut children = Vec::new();

        let use_bulk =
            options.scrape_immediately && options.use_bulk_scraping && urls.len() > 3;

        if use_bulk {
            info!(count = urls.len(), feed_url, "bulk scraping RSS items");
            let results = self
                .scraper
                .scrape_urls_bulk(&urls, options.max_threads)
                .await;

            for (i, (entry, result)) in entries.iter().zip(results).enumerate() {
                // A failed scrape fails only this item, never the feed.
                let page = match result {
                    Ok(page) => Some(page),
                    Err(e) => {
                        error!(url = %entry.url, error = %e, "RSS item scrape failed");
                        None
                    }
                };
                match self
                    .rss_child_asset(&parent, entry, i, page.as_ref(), infospace_id, user_id, &feed_url, options)
                    .await
                {
                    Ok(child) => children.push(child),
                    Err(e) => error!(url = %entry.url, error = %e, "failed to create RSS item asset"),
                }
            }
        } else {
            for (i, entry) in entries.iter().enumerate() {
                let page = if options.scrape_immediately {
                    match self
                        .scraper
                        .scrape_url(&entry.url, options.timeout_secs)
                        .await
                    {
                        Ok(page) => Some(page),
                        Err(e) => {
                            error!(url = %entry.url, error = %e, "RSS item scrape failed");
                            None
                        }
                    }
                } else {
                    None
                };
                match self
                    .rss_child_asset(&parent, entry, i, page.as_ref(), infospace_id, user_id, &feed_url, options)
                    .await
                {
                    Ok(child) => children.push(child),
                    Err(e) => error!(url = %entry.url, error = %e, "failed to create RSS item asset"),
                }
            }
        }

        info!(
            feed = %feed_title,
            items = children.len(),
            "RSS feed processing completed"
        );

        let mut assets = vec![parent];
        assets.extend(children);
        Ok(assets)
    }

    #[allow(clippy::too_many_arguments)]
    async fn rss_child_asset(
        &self,
        parent: &Asset,
        entry: &FeedEntry,
        entry_index: usize,
        page: Option<&crate::scrape::ScrapedPage>,
        infospace_id: i64,
        user_id: i64,
        feed_url: &str,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let title = page
            .and_then(|p| p.title.clone())
            .or_else(|| entry.title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("RSS Item #{}", entry_index + 1));

        let text_content = page
            .and_then(|p| p.text_content.clone())
            .or_else(|| entry.summary.clone())
            .unwrap_or_default();

        let mut create = AssetCreate::new(infospace_id, user_id, title, AssetKind::Web);
        create.parent_asset_id = Some(parent.id);
        create.part_index = Some(entry_index as i32);
        create.source_identifier = Some(entry.url.clone());
        create.content_hash =
            (!text_content.is_empty()).then(|| skein_common::content_hash(text_content.as_bytes()));
        create.text_content = Some(text_content);

        create
            .source_metadata
            .insert("rss_feed_url".into(), serde_json::json!(feed_url));
        create
            .source_metadata
            .insert("rss_item_id".into(), serde_json::json!(entry.id));
        create.source_metadata.insert(
            "rss_published_date".into(),
            serde_json::json!(entry.published.map(|d| d.to_rfc3339())),
        );
        create
            .source_metadata
            .insert("rss_author".into(), serde_json::json!(entry.authors));
        create
            .source_metadata
            .insert("rss_summary".into(), serde_json::json!(entry.summary));
        create
            .source_metadata
            .insert("rss_tags".into(), serde_json::json!(entry.categories));
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );

        if let Some(page) = page {
            create
                .source_metadata
                .insert("scraped_at".into(), serde_json::json!(page.scraped_at));
            create.source_metadata.insert(
                "publication_date".into(),
                serde_json::json!(page.publication_date),
            );
            create
                .source_metadata
                .insert("top_image".into(), serde_json::json!(page.top_image));
            create
                .source_metadata
                .insert("summary".into(), serde_json::json!(page.summary));
            create.source_metadata.insert(
                "content_source".into(),
                serde_json::json!("rss_item_scraped"),
            );
            create.source_metadata.insert(
                "ingestion_method".into(),
                serde_json::json!("rss_bulk_scraping"),
            );
        } else {
            create.source_metadata.insert(
                "content_source".into(),
                serde_json::json!("rss_metadata_only"),
            );
            create.source_metadata.insert(
                "ingestion_method".into(),
                serde_json::json!("rss_metadata_extraction"),
            );
        }

        // Publication date: scraped value first, feed entry second.
        create.event_timestamp = page
            .and_then(|p| p.publication_date.as_deref())
            .and_then(crate::parse_event_timestamp)
            .or(entry.published);

        let asset = self.store.create_asset(create).await?;

        if let Some(page) = page {
            if options.create_image_assets && !page.images.is_empty() {
                create_image_children(self.store.as_ref(), &asset, page, options.max_images)
                    .await?;
            }
        }

        Ok(asset)
    }
}
