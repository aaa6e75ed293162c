//! Content operations on existing assets: CSV materialization, in-place
//! CSV updates that preserve row asset ids, reprocessing, bulk delete.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use skein_common::{
    Asset, AssetKind, BulkFailure, BulkResult, Result, SkeinError,
};
use skein_store::{BlobStorage, Store};

use crate::options::IngestOptions;
use crate::processors::csv::{
    decode_csv, detect_delimiter, normalize_row, parse_records, row_title,
};
use crate::processors::{process_content, ProcessorContext, ProcessorRegistry};
use crate::scrape::ScrapingProvider;

pub struct AssetContentService {
    store: Arc<dyn Store>,
    storage: Arc<dyn BlobStorage>,
    processors: Arc<ProcessorRegistry>,
    scraper: Option<Arc<dyn ScrapingProvider>>,
}

impl AssetContentService {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn BlobStorage>,
        processors: Arc<ProcessorRegistry>,
        scraper: Option<Arc<dyn ScrapingProvider>>,
    ) -> Self {
        Self {
            store,
            storage,
            processors,
            scraper,
        }
    }

    fn context(&self, options: IngestOptions) -> ProcessorContext {
        ProcessorContext {
            store: self.store.clone(),
            storage: self.storage.clone(),
            scraper: self.scraper.clone(),
            options,
        }
    }

    async fn load_asset(&self, asset_id: i64) -> Result<Asset> {
        self.store
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("asset {asset_id}")))
    }

    /// Drop existing children and rerun the appropriate processor with new
    /// options.
    pub async fn reprocess(&self, asset_id: i64, options: IngestOptions) -> Result<Vec<Asset>> {
        let mut asset = self.load_asset(asset_id).await?;
        let ctx = self.context(options);
        process_content(&mut asset, &self.processors, &ctx).await
    }

    /// Generate a real CSV blob from the CSV_ROW children, using the
    /// parent's `columns` metadata for the schema, and attach it as the
    /// parent's blob.
    pub async fn materialize_csv(&self, asset_id: i64) -> Result<String> {
        let mut asset = self.load_asset(asset_id).await?;
        if asset.kind != AssetKind::Csv {
            return Err(SkeinError::Validation(format!(
                "asset {asset_id} is not a CSV asset"
            )));
        }

        let columns: Vec<String> = asset
            .source_metadata
            .get("columns")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .ok_or_else(|| {
                SkeinError::Validation(format!("asset {asset_id} has no columns metadata"))
            })?;

        let delimiter = asset
            .source_metadata
            .get("delimiter_used")
            .and_then(|d| d.as_str())
            .and_then(|d| d.chars().next())
            .unwrap_or(',');

        let children = self.store.list_children(asset_id).await?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter as u8)
            .from_writer(Vec::new());
        writer
            .write_record(&columns)
            .map_err(|e| SkeinError::Processing(format!("CSV write failed: {e}")))?;

        let mut rows_written = 0usize;
        for child in children.iter().filter(|c| c.kind == AssetKind::CsvRow) {
            let row_data = child
                .source_metadata
                .get("original_row_data")
                .and_then(|v| v.as_object());
            let record: Vec<String> = match row_data {
                Some(data) => columns
                    .iter()
                    .map(|col| {
                        data.get(col)
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect(),
                // Fall back to splitting the display text.
                None => child
                    .text_content
                    .as_deref()
                    .unwrap_or_default()
                    .split(" | ")
                    .map(String::from)
                    .collect(),
            };
            writer
                .write_record(&record)
                .map_err(|e| SkeinError::Processing(format!("CSV write failed: {e}")))?;
            rows_written += 1;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| SkeinError::Processing(format!("CSV write failed: {e}")))?;

        let storage_path = asset
            .blob_path
            .clone()
            .unwrap_or_else(|| format!("user_{}/{}.csv", asset.user_id, Uuid::new_v4()));
        self.storage.upload(&storage_path, &bytes).await?;

        asset.blob_path = Some(storage_path.clone());
        asset
            .source_metadata
            .insert("materialized_rows".into(), serde_json::json!(rows_written));
        asset.content_hash = Some(skein_common::content_hash(&bytes));
        self.store.update_asset(&asset).await?;

        info!(asset_id, rows = rows_written, "materialized CSV blob");
        Ok(storage_path)
    }

    /// Overwrite the CSV blob and reparse in place, preserving row asset
    /// ids so annotations attached to the rows survive. Surplus rows are
    /// deleted, missing rows appended.
    pub async fn update_csv_content(
        &self,
        asset_id: i64,
        new_content: &str,
        options: IngestOptions,
    ) -> Result<Vec<Asset>> {
        let mut asset = self.load_asset(asset_id).await?;
        if asset.kind != AssetKind::Csv {
            return Err(SkeinError::Validation(format!(
                "asset {asset_id} is not a CSV asset"
            )));
        }

        let storage_path = asset
            .blob_path
            .clone()
            .unwrap_or_else(|| format!("user_{}/{}.csv", asset.user_id, Uuid::new_v4()));
        self.storage
            .upload(&storage_path, new_content.as_bytes())
            .await?;
        asset.blob_path = Some(storage_path);

        let encoding = options
            .encoding
            .clone()
            .unwrap_or_else(|| "utf-8".to_string());
        let text = decode_csv(new_content.as_bytes(), &encoding);
        let delimiter = options.delimiter.unwrap_or_else(|| detect_delimiter(&text));

        let mut records = parse_records(&text, delimiter).into_iter();
        for _ in 0..options.skip_rows {
            if records.next().is_none() {
                return Err(SkeinError::Processing(format!(
                    "CSV has fewer rows than skip_rows={}",
                    options.skip_rows
                )));
            }
        }
        let header: Vec<String> = records
            .next()
            .ok_or_else(|| SkeinError::Processing("CSV is empty or has no header row".into()))?
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if header.is_empty() {
            return Err(SkeinError::Processing("CSV header row is empty".into()));
        }

        let rows: Vec<Vec<String>> = records
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .take(options.max_rows)
            .collect();

        let existing = self.store.list_children(asset_id).await?;
        let existing_rows: Vec<&Asset> = existing
            .iter()
            .filter(|c| c.kind == AssetKind::CsvRow)
            .collect();

        let mut result_rows = Vec::new();
        let mut full_text_parts = vec![format!("CSV Headers: {}", header.join(" | "))];

        for (index, row) in rows.iter().enumerate() {
            let cleaned = normalize_row(row, header.len());
            let row_text = cleaned.join(" | ");
            full_text_parts.push(row_text.clone());
            let title = row_title(index + 1, &cleaned);
            let row_data: skein_common::Metadata = header
                .iter()
                .zip(cleaned.iter())
                .map(|(h, c)| (h.clone(), serde_json::Value::String(c.clone())))
                .collect();

            match existing_rows
                .iter()
                .find(|c| c.part_index == Some(index as i32))
            {
                Some(current) => {
                    // Update in place; the asset id (and its annotations)
                    // survive.
                    let mut updated = (*current).clone();
                    updated.title = title;
                    updated.text_content = Some(row_text);
                    updated.source_metadata.insert(
                        "original_row_data".into(),
                        serde_json::Value::Object(row_data),
                    );
                    updated
                        .source_metadata
                        .insert("data_row_index".into(), serde_json::json!(index));
                    self.store.update_asset(&updated).await?;
                    result_rows.push(updated);
                }
                None => {
                    let mut create = skein_common::AssetCreate::new(
                        asset.infospace_id,
                        asset.user_id,
                        title,
                        AssetKind::CsvRow,
                    );
                    create.parent_asset_id = Some(asset.id);
                    create.source_id = asset.source_id;
                    create.part_index = Some(index as i32);
                    create.text_content = Some(row_text);
                    create
                        .source_metadata
                        .insert("data_row_index".into(), serde_json::json!(index));
                    create.source_metadata.insert(
                        "original_row_data".into(),
                        serde_json::Value::Object(row_data),
                    );
                    result_rows.push(self.store.create_asset(create).await?);
                }
            }
        }

        // Rows beyond the new row count are gone from the source.
        for surplus in existing_rows
            .iter()
            .filter(|c| c.part_index.map(|i| i as usize >= rows.len()).unwrap_or(true))
        {
            self.store.delete_asset(surplus.id).await?;
        }

        asset.text_content = Some(full_text_parts.join("\n"));
        asset
            .source_metadata
            .insert("columns".into(), serde_json::json!(header));
        asset.source_metadata.insert(
            "delimiter_used".into(),
            serde_json::json!(delimiter.to_string()),
        );
        asset
            .source_metadata
            .insert("rows_processed".into(), serde_json::json!(rows.len()));
        asset
            .source_metadata
            .insert("column_count".into(), serde_json::json!(header.len()));
        asset.content_hash = Some(skein_common::content_hash(new_content.as_bytes()));
        self.store.update_asset(&asset).await?;

        info!(asset_id, rows = rows.len(), "updated CSV content in place");
        Ok(result_rows)
    }

    /// Delete a batch of assets. Per-item failures are accumulated; the
    /// successful deletions stand.
    pub async fn bulk_delete(
        &self,
        asset_ids: &[i64],
        infospace_id: i64,
    ) -> Result<BulkResult> {
        let mut result = BulkResult::default();
        for &asset_id in asset_ids {
            let outcome = async {
                let asset = self.load_asset(asset_id).await?;
                if asset.infospace_id != infospace_id {
                    return Err(SkeinError::AccessDenied(format!(
                        "asset {asset_id} is not in infospace {infospace_id}"
                    )));
                }
                self.store.delete_children(asset_id).await?;
                self.store.delete_asset(asset_id).await?;
                Ok::<_, SkeinError>(())
            }
            .await;

            match outcome {
                Ok(()) => result.succeeded.push(asset_id),
                Err(e) => {
                    warn!(asset_id, error = %e, "bulk delete item failed");
                    result.failed.push(BulkFailure {
                        item: asset_id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::register_processors;
    use skein_common::AssetCreate;
    use skein_store::{MemoryStorage, MemoryStore};

    fn service() -> (AssetContentService, Arc<MemoryStore>, Arc<MemoryStorage>) {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let mut registry = ProcessorRegistry::new();
        register_processors(&mut registry);
        let service = AssetContentService::new(
            store.clone(),
            storage.clone(),
            Arc::new(registry),
            None,
        );
        (service, store, storage)
    }

    async fn seeded_csv(
        service: &AssetContentService,
        store: &MemoryStore,
        storage: &MemoryStorage,
    ) -> Asset {
        storage
            .upload("user_1/people.csv", b"name,age\nAda,36\nGrace,85\n")
            .await
            .unwrap();
        let mut create = AssetCreate::new(1, 1, "people.csv", AssetKind::Csv);
        create.blob_path = Some("user_1/people.csv".into());
        let asset = store.create_asset(create).await.unwrap();
        service
            .reprocess(asset.id, IngestOptions::default())
            .await
            .unwrap();
        store.get_asset(asset.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_materialize_round_trip() {
        let (service, store, storage) = service();
        let asset = seeded_csv(&service, &store, &storage).await;

        let path = service.materialize_csv(asset.id).await.unwrap();
        let bytes = storage.get(&path).await.unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "name,age\nAda,36\nGrace,85\n");
    }

    #[tokio::test]
    async fn test_reprocess_replaces_children() {
        let (service, store, storage) = service();
        let asset = seeded_csv(&service, &store, &storage).await;

        // Same source, reprocessed: child count equals the data rows, not
        // accumulated across runs.
        service
            .reprocess(asset.id, IngestOptions::default())
            .await
            .unwrap();
        let children = store.list_children(asset.id).await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn test_update_csv_preserves_row_ids() {
        let (service, store, storage) = service();
        let asset = seeded_csv(&service, &store, &storage).await;

        let before = store.list_children(asset.id).await.unwrap();
        let ids_before: Vec<i64> = before.iter().map(|c| c.id).collect();

        let updated = service
            .update_csv_content(
                asset.id,
                "name,age\nAda,37\nGrace,85\nGrace Jr,20\n",
                IngestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(updated.len(), 3);
        // First two rows kept their ids.
        assert_eq!(updated[0].id, ids_before[0]);
        assert_eq!(updated[1].id, ids_before[1]);
        assert_eq!(updated[0].text_content.as_deref(), Some("Ada | 37"));

        // Shrinking drops the surplus row.
        let shrunk = service
            .update_csv_content(asset.id, "name,age\nAda,38\n", IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(shrunk.len(), 1);
        assert_eq!(shrunk[0].id, ids_before[0]);
        let children = store.list_children(asset.id).await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_delete_accumulates_failures() {
        let (service, store, storage) = service();
        let asset = seeded_csv(&service, &store, &storage).await;

        let result = service.bulk_delete(&[asset.id, 9999], 1).await.unwrap();
        assert_eq!(result.succeeded, vec![asset.id]);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].reason.contains("Not found"));
    }
}
