//! Web-page and URL-list handlers.

use chrono::Utc;
use tracing::{error, info};

use skein_common::{Asset, AssetCreate, AssetKind, Result};

use crate::options::IngestOptions;
use crate::processors::web::create_image_children;
use crate::router::IngestionRouter;
use crate::scrape::ScrapedPage;
use crate::parse_event_timestamp;

impl IngestionRouter {
    /// One WEB asset; scraped through the web processor when asked.
    pub(crate) async fn handle_web_page(
        &self,
        url: String,
        infospace_id: i64,
        user_id: i64,
        title: Option<String>,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let asset_title = title.unwrap_or_else(|| format!("Article: {url}"));

        let mut create = AssetCreate::new(infospace_id, user_id, asset_title, AssetKind::Web);
        create.source_identifier = Some(url.clone());
        create
            .source_metadata
            .insert("original_url".into(), serde_json::json!(url));
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create
            .source_metadata
            .insert("ingestion_method".into(), serde_json::json!("web_scraping"));

        let mut asset = self.store.create_asset(create).await?;

        if options.scrape_immediately {
            self.process_new_asset(&mut asset, options).await;
        }

        Ok(asset)
    }

    /// Bulk URL ingestion. More than three URLs with bulk scraping on goes
    /// through the provider's concurrent path; otherwise each URL is
    /// handled sequentially with a 500 ms pacing delay.
    pub(crate) async fn handle_url_list(
        &self,
        urls: Vec<String>,
        infospace_id: i64,
        user_id: i64,
        options: &IngestOptions,
    ) -> Result<Vec<Asset>> {
        let base_title = options
            .base_title
            .clone()
            .unwrap_or_else(|| "Bulk URL Collection".to_string());
        let use_bulk =
            options.use_bulk_scraping && options.scrape_immediately && urls.len() > 3;

        let mut assets = Vec::new();

        if use_bulk {
            info!(count = urls.len(), "using bulk scraping for URL list");
            let results = self
                .scraper
                .scrape_urls_bulk(&urls, options.max_threads)
                .await;

            for (i, (url, result)) in urls.iter().zip(results).enumerate() {
                let page = match result {
                    Ok(page) => page,
                    Err(e) => {
                        error!(url, error = %e, "bulk scrape failed for URL");
                        continue;
                    }
                };
                match self
                    .asset_from_scraped_page(
                        url, &page, i, urls.len(), &base_title, infospace_id, user_id, options,
                    )
                    .await
                {
                    Ok(asset) => assets.push(asset),
                    Err(e) => error!(url, error = %e, "failed to create asset from scrape"),
                }
            }
        } else {
            for (i, url) in urls.iter().enumerate() {
                let url_title = format!("{base_title} #{}", i + 1);
                match self
                    .handle_web_page(
                        url.clone(),
                        infospace_id,
                        user_id,
                        Some(url_title),
                        options,
                    )
                    .await
                {
                    Ok(asset) => assets.push(asset),
                    Err(e) => {
                        error!(url, error = %e, "failed to ingest URL in bulk operation");
                        continue;
                    }
                }
                if options.scrape_immediately {
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }

        info!(
            succeeded = assets.len(),
            total = urls.len(),
            "bulk URL ingestion completed"
        );
        Ok(assets)
    }

    /// Build a WEB asset directly from an already-scraped payload.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn asset_from_scraped_page(
        &self,
        url: &str,
        page: &ScrapedPage,
        batch_index: usize,
        batch_total: usize,
        base_title: &str,
        infospace_id: i64,
        user_id: i64,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let title = page
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{base_title} #{}", batch_index + 1));
        let text_content = page.text_content.clone().unwrap_or_default();

        let mut create = AssetCreate::new(infospace_id, user_id, title, AssetKind::Web);
        create.source_identifier = Some(url.to_string());
        create.content_hash =
            (!text_content.is_empty()).then(|| skein_common::content_hash(text_content.as_bytes()));
        create
            .source_metadata
            .insert("original_url".into(), serde_json::json!(url));
        create
            .source_metadata
            .insert("scraped_at".into(), serde_json::json!(page.scraped_at));
        create.source_metadata.insert(
            "scraping_method".into(),
            serde_json::json!(page.scraping_method.clone().unwrap_or_else(|| "bulk".into())),
        );
        create
            .source_metadata
            .insert("batch_index".into(), serde_json::json!(batch_index));
        create
            .source_metadata
            .insert("batch_total".into(), serde_json::json!(batch_total));
        create.source_metadata.insert(
            "publication_date".into(),
            serde_json::json!(page.publication_date),
        );
        create
            .source_metadata
            .insert("authors".into(), serde_json::json!(page.authors));
        create
            .source_metadata
            .insert("top_image".into(), serde_json::json!(page.top_image));
        create
            .source_metadata
            .insert("images".into(), serde_json::json!(page.images));
        create
            .source_metadata
            .insert("summary".into(), serde_json::json!(page.summary));
        create
            .source_metadata
            .insert("keywords".into(), serde_json::json!(page.keywords));
        create.source_metadata.insert(
            "content_length".into(),
            serde_json::json!(text_content.len()),
        );
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create.source_metadata.insert(
            "ingestion_method".into(),
            serde_json::json!("bulk_url_scraping"),
        );
        create.text_content = Some(text_content);

        if let Some(raw) = &page.publication_date {
            create.event_timestamp = parse_event_timestamp(raw);
        }

        let asset = self.store.create_asset(create).await?;

        if options.create_image_assets && !page.images.is_empty() {
            create_image_children(
                self.store.as_ref(),
                &asset,
                page,
                options.max_images,
            )
            .await?;
        }

        Ok(asset)
    }
}
