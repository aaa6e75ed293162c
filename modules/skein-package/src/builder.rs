//! Package builders, one per resource type.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error};

use skein_common::{secure_filename, Asset, AssetKind, Result, SkeinError};
use skein_store::{BlobStorage, Store};

use crate::package::{DataPackage, PackageMetadata, PackageType};

/// Large text bodies become separate files instead of manifest entries.
const INLINE_TEXT_LIMIT: usize = 5000;
const TEXT_AS_FILE_THRESHOLD: usize = 1024;

/// Kinds whose children are embedded when exporting hierarchically.
const HIERARCHICAL_KINDS: [AssetKind; 5] = [
    AssetKind::Pdf,
    AssetKind::Csv,
    AssetKind::Web,
    AssetKind::Mbox,
    AssetKind::Article,
];

/// Collects blob files under `files/`, resolving name conflicts with
/// `_1`, `_2`, ... suffixes.
#[derive(Default)]
struct FileCollector {
    files: BTreeMap<String, Vec<u8>>,
}

impl FileCollector {
    fn add(&mut self, original_filename: &str, content: Vec<u8>) -> String {
        let mut safe = secure_filename(original_filename);
        if safe.is_empty() {
            safe = format!("unnamed_file_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        }

        let mut zip_path = format!("files/{safe}");
        if self.files.contains_key(&zip_path) {
            let (stem, suffix) = match safe.rfind('.') {
                Some(dot) if dot > 0 => (safe[..dot].to_string(), safe[dot..].to_string()),
                _ => (safe.clone(), String::new()),
            };
            let mut counter = 1;
            loop {
                let candidate = format!("files/{stem}_{counter}{suffix}");
                if !self.files.contains_key(&candidate) {
                    zip_path = candidate;
                    break;
                }
                counter += 1;
            }
        }

        debug!(path = %zip_path, bytes = content.len(), "added file to package");
        self.files.insert(zip_path.clone(), content);
        zip_path
    }
}

pub struct PackageBuilder {
    store: Arc<dyn Store>,
    storage: Arc<dyn BlobStorage>,
    source_instance_id: String,
}

impl PackageBuilder {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn BlobStorage>,
        source_instance_id: &str,
    ) -> Self {
        Self {
            store,
            storage,
            source_instance_id: source_instance_id.to_string(),
        }
    }

    async fn fetch_blob(&self, storage_path: &str) -> Option<Vec<u8>> {
        match self.storage.get(storage_path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(storage_path, error = %e, "failed to fetch file from storage");
                None
            }
        }
    }

    fn blob_filename(asset: &Asset) -> String {
        asset
            .source_metadata
            .get("original_filename")
            .and_then(|f| f.as_str())
            .map(String::from)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| {
                if asset.title.is_empty() {
                    asset
                        .blob_path
                        .as_deref()
                        .and_then(|p| p.rsplit('/').next())
                        .unwrap_or("blob")
                        .to_string()
                } else {
                    asset.title.clone()
                }
            })
    }

    async fn annotations_for_asset(
        &self,
        asset_id: i64,
        include_justifications: bool,
    ) -> Result<Vec<Value>> {
        let mut entries = Vec::new();
        for annotation in self.store.list_annotations_for_asset(asset_id).await? {
            let mut entry = serde_json::to_value(&annotation)
                .map_err(|e| SkeinError::Validation(e.to_string()))?;

            if let Some(schema) = self.store.get_schema(annotation.schema_id).await? {
                entry["schema_reference"] = json!({
                    "uuid": schema.uuid.to_string(),
                    "id": schema.id,
                    "name": schema.name,
                    "version": schema.version,
                });
            }
            if let Some(run_id) = annotation.run_id {
                if let Some(run) = self.store.get_run(run_id).await? {
                    entry["run_reference"] = json!({
                        "uuid": run.uuid.to_string(),
                        "id": run.id,
                        "name": run.name,
                    });
                }
            }
            if include_justifications {
                let justifications = self.store.list_justifications(annotation.id).await?;
                if !justifications.is_empty() {
                    entry["justifications"] = serde_json::to_value(&justifications)
                        .map_err(|e| SkeinError::Validation(e.to_string()))?;
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Serialize one asset into its package representation: blob embedded
    /// as a file, long text split out, annotations and children inlined
    /// on request.
    #[allow(clippy::too_many_arguments)]
    async fn asset_to_value(
        &self,
        asset: &Asset,
        collector: &mut FileCollector,
        inline_text_limit: Option<usize>,
        include_annotations: bool,
        include_justifications: bool,
        include_children: bool,
    ) -> Result<Value> {
        let mut value =
            serde_json::to_value(asset).map_err(|e| SkeinError::Validation(e.to_string()))?;

        if let Some(blob_path) = &asset.blob_path {
            match self.fetch_blob(blob_path).await {
                Some(bytes) => {
                    let reference = collector.add(&Self::blob_filename(asset), bytes);
                    value["blob_file_reference"] = json!(reference);
                }
                None => {
                    value["blob_path_fetch_failed"] = json!(true);
                }
            }
        }

        if let (Some(limit), Some(text)) = (inline_text_limit, asset.text_content.as_deref()) {
            if text.len() > limit {
                let reference = collector.add(
                    &format!("asset_{}_content.txt", asset.uuid),
                    text.as_bytes().to_vec(),
                );
                value["text_content_file_reference"] = json!(reference);
                if let Some(object) = value.as_object_mut() {
                    object.remove("text_content");
                }
            }
        }

        if include_annotations {
            value["annotations"] = Value::Array(
                self.annotations_for_asset(asset.id, include_justifications)
                    .await?,
            );
        }

        if include_children && HIERARCHICAL_KINDS.contains(&asset.kind) {
            let children = self.store.list_children(asset.id).await?;
            if !children.is_empty() {
                let mut children_values = Vec::with_capacity(children.len());
                for child in &children {
                    children_values.push(
                        Box::pin(self.asset_to_value(
                            child,
                            collector,
                            inline_text_limit,
                            include_annotations,
                            include_justifications,
                            include_children,
                        ))
                        .await?,
                    );
                }
                value["children_assets"] = Value::Array(children_values);
            }
        }

        Ok(value)
    }

    async fn load_asset(&self, asset_id: i64) -> Result<Asset> {
        self.store
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("asset {asset_id}")))
    }

    // ------------------------------------------------------------------
    // Per-type builders
    // ------------------------------------------------------------------

    pub async fn build_asset_package(
        &self,
        asset_id: i64,
        include_text_content_as_file: bool,
        include_annotations: bool,
        include_justifications: bool,
    ) -> Result<DataPackage> {
        let asset = self.load_asset(asset_id).await?;
        let mut collector = FileCollector::default();

        let inline_limit = include_text_content_as_file.then_some(TEXT_AS_FILE_THRESHOLD);
        let asset_value = self
            .asset_to_value(
                &asset,
                &mut collector,
                inline_limit,
                include_annotations,
                include_justifications,
                false,
            )
            .await?;

        let metadata = PackageMetadata::new(PackageType::Asset, &self.source_instance_id)
            .entity(asset.uuid.to_string(), asset.id, &asset.title)
            .description(format!("Asset: {}", asset.title));
        let mut package = DataPackage::new(metadata, json!({"asset": asset_value}));
        package.files = collector.files;
        Ok(package)
    }

    pub async fn build_source_package(
        &self,
        source_id: i64,
        include_assets: bool,
    ) -> Result<DataPackage> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("source {source_id}")))?;
        let mut collector = FileCollector::default();

        let mut source_value =
            serde_json::to_value(&source).map_err(|e| SkeinError::Validation(e.to_string()))?;

        // The primary file associated with the source itself, if any.
        if let Some(storage_path) = source.details.get("storage_path").and_then(|p| p.as_str()) {
            match self.fetch_blob(storage_path).await {
                Some(bytes) => {
                    let filename = source
                        .details
                        .get("filename")
                        .and_then(|f| f.as_str())
                        .unwrap_or_else(|| {
                            storage_path.rsplit('/').next().unwrap_or("source_file")
                        });
                    let reference = collector.add(filename, bytes);
                    source_value["main_file_reference"] = json!(reference);
                }
                None => {
                    source_value["main_file_fetch_failed"] = json!(true);
                }
            }
        }

        if include_assets {
            let assets = self.store.list_assets_by_source(source_id).await?;
            let mut asset_values = Vec::new();
            for asset in assets.iter().filter(|a| a.parent_asset_id.is_none()) {
                asset_values.push(
                    self.asset_to_value(
                        asset,
                        &mut collector,
                        Some(INLINE_TEXT_LIMIT),
                        true,
                        true,
                        true,
                    )
                    .await?,
                );
            }
            source_value["assets"] = Value::Array(asset_values);
        }

        let metadata = PackageMetadata::new(PackageType::Source, &self.source_instance_id)
            .entity(source.uuid.to_string(), source.id, &source.name)
            .description(format!("Source: {}", source.name));
        let mut package = DataPackage::new(metadata, json!({"source": source_value}));
        package.files = collector.files;
        Ok(package)
    }

    pub async fn build_schema_package(&self, schema_id: i64) -> Result<DataPackage> {
        let schema = self
            .store
            .get_schema(schema_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("schema {schema_id}")))?;

        let schema_value =
            serde_json::to_value(&schema).map_err(|e| SkeinError::Validation(e.to_string()))?;

        let metadata = PackageMetadata::new(PackageType::Schema, &self.source_instance_id)
            .entity(schema.uuid.to_string(), schema.id, &schema.name)
            .description(format!(
                "AnnotationSchema: {} v{}",
                schema.name, schema.version
            ));
        Ok(DataPackage::new(
            metadata,
            json!({"annotation_schema": schema_value}),
        ))
    }

    pub async fn build_run_package(
        &self,
        run_id: i64,
        include_annotations: bool,
        include_justifications: bool,
    ) -> Result<DataPackage> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("run {run_id}")))?;

        let mut run_value =
            serde_json::to_value(&run).map_err(|e| SkeinError::Validation(e.to_string()))?;

        let mut schema_references = Vec::new();
        for &schema_id in &run.target_schema_ids {
            if let Some(schema) = self.store.get_schema(schema_id).await? {
                schema_references.push(json!({
                    "uuid": schema.uuid.to_string(),
                    "id": schema.id,
                    "name": schema.name,
                    "version": schema.version,
                }));
            }
        }
        run_value["target_schema_references"] = Value::Array(schema_references);

        if include_annotations {
            let mut entries = Vec::new();
            for annotation in self.store.list_annotations_for_run(run_id).await? {
                let mut entry = serde_json::to_value(&annotation)
                    .map_err(|e| SkeinError::Validation(e.to_string()))?;
                if let Some(asset) = self.store.get_asset(annotation.asset_id).await? {
                    entry["asset_reference"] = json!({
                        "uuid": asset.uuid.to_string(),
                        "id": asset.id,
                        "title": asset.title,
                    });
                }
                if let Some(schema) = self.store.get_schema(annotation.schema_id).await? {
                    entry["schema_reference"] = json!({
                        "uuid": schema.uuid.to_string(),
                        "id": schema.id,
                        "name": schema.name,
                        "version": schema.version,
                    });
                }
                if include_justifications {
                    let justifications = self.store.list_justifications(annotation.id).await?;
                    if !justifications.is_empty() {
                        entry["justifications"] = serde_json::to_value(&justifications)
                            .map_err(|e| SkeinError::Validation(e.to_string()))?;
                    }
                }
                entries.push(entry);
            }
            run_value["annotations"] = Value::Array(entries);
        }

        let metadata = PackageMetadata::new(PackageType::Run, &self.source_instance_id)
            .entity(run.uuid.to_string(), run.id, &run.name)
            .description(format!("AnnotationRun: {}", run.name));
        Ok(DataPackage::new(
            metadata,
            json!({"annotation_run": run_value}),
        ))
    }

    pub async fn build_bundle_package(
        &self,
        bundle_id: i64,
        include_assets_content: bool,
        include_asset_annotations: bool,
    ) -> Result<DataPackage> {
        let bundle = self
            .store
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("bundle {bundle_id}")))?;
        let mut collector = FileCollector::default();

        let mut bundle_value =
            serde_json::to_value(&bundle).map_err(|e| SkeinError::Validation(e.to_string()))?;

        let mut references = Vec::new();
        for asset_id in self.store.bundle_asset_ids(bundle_id).await? {
            let Some(asset) = self.store.get_asset(asset_id).await? else {
                continue;
            };
            let mut reference = json!({
                "uuid": asset.uuid.to_string(),
                "id": asset.id,
                "title": asset.title,
                "kind": asset.kind.to_string(),
            });
            if include_assets_content {
                reference["full_content"] = self
                    .asset_to_value(
                        &asset,
                        &mut collector,
                        Some(INLINE_TEXT_LIMIT),
                        include_asset_annotations,
                        include_asset_annotations,
                        true,
                    )
                    .await?;
            }
            references.push(reference);
        }
        bundle_value["asset_references"] = Value::Array(references);

        let metadata = PackageMetadata::new(PackageType::Bundle, &self.source_instance_id)
            .entity(bundle.uuid.to_string(), bundle.id, &bundle.name)
            .description(format!("Bundle: {}", bundle.name));
        let mut package = DataPackage::new(metadata, json!({"bundle": bundle_value}));
        package.files = collector.files;
        Ok(package)
    }

    pub async fn build_dataset_package(
        &self,
        dataset_id: i64,
        include_assets: bool,
        include_annotations: bool,
    ) -> Result<DataPackage> {
        let dataset = self
            .store
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("dataset {dataset_id}")))?;
        let mut collector = FileCollector::default();

        let mut dataset_value =
            serde_json::to_value(&dataset).map_err(|e| SkeinError::Validation(e.to_string()))?;

        if include_assets {
            let mut asset_values = Vec::new();
            for &asset_id in &dataset.asset_ids {
                let Some(asset) = self.store.get_asset(asset_id).await? else {
                    continue;
                };
                asset_values.push(
                    self.asset_to_value(
                        &asset,
                        &mut collector,
                        Some(INLINE_TEXT_LIMIT),
                        include_annotations,
                        include_annotations,
                        false,
                    )
                    .await?,
                );
            }
            dataset_value["assets"] = Value::Array(asset_values);
        }

        let mut schema_values = Vec::new();
        for &schema_id in &dataset.schema_ids {
            if let Some(schema) = self.store.get_schema(schema_id).await? {
                schema_values.push(
                    serde_json::to_value(&schema)
                        .map_err(|e| SkeinError::Validation(e.to_string()))?,
                );
            }
        }
        dataset_value["annotation_schemas"] = Value::Array(schema_values);

        // Runs are exported as metadata only.
        let mut run_values = Vec::new();
        for &run_id in &dataset.run_ids {
            if let Some(run) = self.store.get_run(run_id).await? {
                run_values.push(
                    serde_json::to_value(&run)
                        .map_err(|e| SkeinError::Validation(e.to_string()))?,
                );
            }
        }
        dataset_value["annotation_runs"] = Value::Array(run_values);

        let metadata = PackageMetadata::new(PackageType::Dataset, &self.source_instance_id)
            .entity(dataset.uuid.to_string(), dataset.id, &dataset.name)
            .description(format!("Dataset: {}", dataset.name));
        let mut package = DataPackage::new(metadata, json!({"dataset": dataset_value}));
        package.files = collector.files;
        Ok(package)
    }

    pub async fn build_mixed_package(
        &self,
        asset_ids: &[i64],
        bundle_ids: &[i64],
        include_assets_content: bool,
        include_asset_annotations: bool,
    ) -> Result<DataPackage> {
        let mut collector = FileCollector::default();

        let mut asset_values = Vec::new();
        for &asset_id in asset_ids {
            let asset = self.load_asset(asset_id).await?;
            asset_values.push(
                self.asset_to_value(
                    &asset,
                    &mut collector,
                    Some(INLINE_TEXT_LIMIT),
                    include_asset_annotations,
                    include_asset_annotations,
                    true,
                )
                .await?,
            );
        }

        let mut bundle_values = Vec::new();
        for &bundle_id in bundle_ids {
            let Some(bundle) = self.store.get_bundle(bundle_id).await? else {
                continue;
            };
            let mut bundle_value = serde_json::to_value(&bundle)
                .map_err(|e| SkeinError::Validation(e.to_string()))?;
            let mut references = Vec::new();
            for asset_id in self.store.bundle_asset_ids(bundle_id).await? {
                let Some(asset) = self.store.get_asset(asset_id).await? else {
                    continue;
                };
                let mut reference = json!({
                    "uuid": asset.uuid.to_string(),
                    "id": asset.id,
                    "title": asset.title,
                    "kind": asset.kind.to_string(),
                });
                if include_assets_content {
                    reference["full_content"] = self
                        .asset_to_value(
                            &asset,
                            &mut collector,
                            Some(INLINE_TEXT_LIMIT),
                            include_asset_annotations,
                            include_asset_annotations,
                            true,
                        )
                        .await?;
                }
                references.push(reference);
            }
            bundle_value["asset_references"] = Value::Array(references);
            bundle_values.push(bundle_value);
        }

        let metadata = PackageMetadata::new(PackageType::Mixed, &self.source_instance_id)
            .description(format!(
                "Mixed export containing {} assets and {} bundles",
                asset_ids.len(),
                bundle_ids.len()
            ));
        let mut package = DataPackage::new(
            metadata,
            json!({"assets": asset_values, "bundles": bundle_values}),
        );
        package.files = collector.files;
        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_collector_conflicts() {
        let mut collector = FileCollector::default();
        assert_eq!(collector.add("report.pdf", vec![1]), "files/report.pdf");
        assert_eq!(collector.add("report.pdf", vec![2]), "files/report_1.pdf");
        assert_eq!(collector.add("report.pdf", vec![3]), "files/report_2.pdf");
    }

    #[test]
    fn test_file_collector_sanitizes() {
        let mut collector = FileCollector::default();
        let path = collector.add("../../etc/passwd", vec![1]);
        assert_eq!(path, "files/etc_passwd");
        let fallback = collector.add("...", vec![2]);
        assert!(fallback.starts_with("files/unnamed_file_"));
    }
}
