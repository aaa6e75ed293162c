//! File-based handlers: uploads, direct file URLs, pasted text.

use chrono::Utc;
use tracing::info;
use url::Url;
use uuid::Uuid;

use skein_common::{content_hash, Asset, AssetCreate, AssetKind, Result, SkeinError};

use crate::options::IngestOptions;
use crate::processors::{needs_processing, registry::detect_asset_kind_from_extension};
use crate::router::IngestionRouter;

fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

impl IngestionRouter {
    /// Store the bytes under `user_<uid>/<uuid><ext>`, create the asset,
    /// and process it when the strategy says so.
    pub(crate) async fn handle_file_upload(
        &self,
        filename: String,
        bytes: Vec<u8>,
        infospace_id: i64,
        user_id: i64,
        title: Option<String>,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let ext = file_extension(&filename);
        let kind = detect_asset_kind_from_extension(&ext);
        let storage_path = format!("user_{user_id}/{}{ext}", Uuid::new_v4());
        let file_size = bytes.len() as u64;

        self.storage.upload(&storage_path, &bytes).await?;

        let asset_title = title.unwrap_or_else(|| {
            if filename.is_empty() {
                format!("Uploaded {kind}")
            } else {
                filename.clone()
            }
        });

        let mut create = AssetCreate::new(infospace_id, user_id, asset_title, kind);
        create.blob_path = Some(storage_path);
        create.content_hash = Some(content_hash(&bytes));
        create
            .source_metadata
            .insert("original_filename".into(), serde_json::json!(filename));
        create
            .source_metadata
            .insert("file_size".into(), serde_json::json!(file_size));
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create
            .source_metadata
            .insert("ingestion_method".into(), serde_json::json!("file_upload"));

        let mut asset = self.store.create_asset(create).await?;
        info!(asset_id = asset.id, ?kind, file_size, "created file asset");

        if needs_processing(kind)
            && self.strategy.should_process_immediately(
                kind,
                options.process_immediately,
                Some(file_size),
            )
        {
            self.process_new_asset(&mut asset, options).await;
        }

        Ok(asset)
    }

    /// Download the URL (following redirects), then behave as an upload.
    pub(crate) async fn handle_direct_file_url(
        &self,
        url: String,
        infospace_id: i64,
        user_id: i64,
        title: Option<String>,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SkeinError::Processing(format!("Download failed for {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(SkeinError::Processing(format!(
                "Download failed ({}) for {url}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SkeinError::Processing(format!("Download failed for {url}: {e}")))?;

        let parsed = Url::parse(&url)
            .map_err(|e| SkeinError::Validation(format!("invalid URL {url}: {e}")))?;
        let path_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        let ext = file_extension(&path_name);
        let kind = detect_asset_kind_from_extension(&ext);
        let storage_path = format!("user_{user_id}/{}{ext}", Uuid::new_v4());
        let file_size = bytes.len() as u64;

        self.storage.upload(&storage_path, &bytes).await?;

        let asset_title = title
            .or_else(|| (!path_name.is_empty()).then(|| path_name.clone()))
            .unwrap_or_else(|| {
                format!(
                    "Downloaded file from {}",
                    parsed.host_str().unwrap_or("unknown host")
                )
            });

        let mut create = AssetCreate::new(infospace_id, user_id, asset_title, kind);
        create.blob_path = Some(storage_path);
        create.source_identifier = Some(url.clone());
        create.content_hash = Some(content_hash(&bytes));
        create
            .source_metadata
            .insert("original_download_url".into(), serde_json::json!(url));
        create.source_metadata.insert(
            "downloaded_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create.source_metadata.insert(
            "ingestion_method".into(),
            serde_json::json!("direct_file_url"),
        );

        let mut asset = self.store.create_asset(create).await?;
        info!(asset_id = asset.id, ?kind, file_size, url, "downloaded file asset");

        if needs_processing(kind)
            && self.strategy.should_process_immediately(
                kind,
                options.process_immediately,
                Some(file_size),
            )
        {
            self.process_new_asset(&mut asset, options).await;
        }

        Ok(asset)
    }

    /// Create a TEXT asset; no blob involved.
    pub(crate) async fn handle_text_content(
        &self,
        text: String,
        infospace_id: i64,
        user_id: i64,
        title: Option<String>,
        options: &IngestOptions,
    ) -> Result<Asset> {
        let asset_title =
            title.unwrap_or_else(|| format!("Text Content ({} chars)", text.len()));

        let mut create = AssetCreate::new(infospace_id, user_id, asset_title, AssetKind::Text);
        create.content_hash = Some(content_hash(text.as_bytes()));
        create
            .source_metadata
            .insert("content_length".into(), serde_json::json!(text.len()));
        create.source_metadata.insert(
            "ingested_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        create
            .source_metadata
            .insert("ingestion_method".into(), serde_json::json!("direct_text"));
        for (key, value) in &options.metadata {
            create.source_metadata.insert(key.clone(), value.clone());
        }
        create.text_content = Some(text);

        self.store.create_asset(create).await
    }
}
