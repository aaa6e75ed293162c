//! Package importer: recreates entities under a target infospace with
//! UUID-based conflict resolution (`skip` strategy) and an in-session
//! UUID map so cross-references resolve.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use skein_common::{
    Annotation, AnnotationCreate, AnnotationRun, AnnotationSchema, AnnotationStatus, Asset,
    AssetCreate, AssetKind, Bundle, BundleCreate, Dataset, DatasetCreate, JustificationCreate,
    Metadata, Result, RunCreate, SchemaCreate, SchemaTargetLevel, SkeinError, Source,
    SourceCreate,
};
use skein_store::{BlobStorage, Store};

use crate::package::{DataPackage, PackageType};

const TYPE_ASSET: &str = "asset";
const TYPE_SOURCE: &str = "source";
const TYPE_SCHEMA: &str = "schema";
const TYPE_RUN: &str = "run";
const TYPE_ANNOTATION: &str = "annotation";
const TYPE_BUNDLE: &str = "bundle";
const TYPE_DATASET: &str = "dataset";

/// What an import produced, plus the assets whose kind requires content
/// processing once the surrounding transaction has committed.
#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub sources: Vec<Source>,
    pub assets: Vec<Asset>,
    pub schemas: Vec<AnnotationSchema>,
    pub runs: Vec<AnnotationRun>,
    pub bundles: Vec<Bundle>,
    pub datasets: Vec<Dataset>,
    pub annotations: Vec<Annotation>,
    pub assets_needing_processing: Vec<Asset>,
}

pub struct PackageImporter {
    store: Arc<dyn Store>,
    storage: Arc<dyn BlobStorage>,
    target_infospace_id: i64,
    target_user_id: i64,
    /// `{resource_type -> {source_uuid -> (local_id, local_uuid)}}`
    uuid_map: HashMap<&'static str, HashMap<String, (i64, String)>>,
}

fn obj(value: &Value, context: &str) -> Result<Metadata> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| SkeinError::Validation(format!("{context} is not an object")))
}

fn str_field(map: &Metadata, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn metadata_field(map: &Metadata, key: &str) -> Metadata {
    map.get(key)
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn entity_uuid(map: &Metadata) -> String {
    str_field(map, "uuid")
        .or_else(|| str_field(map, "entity_uuid"))
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

impl PackageImporter {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn BlobStorage>,
        target_infospace_id: i64,
        target_user_id: i64,
    ) -> Self {
        Self {
            store,
            storage,
            target_infospace_id,
            target_user_id,
            uuid_map: HashMap::new(),
        }
    }

    fn register(&mut self, entity_type: &'static str, source_uuid: &str, id: i64, uuid: String) {
        self.uuid_map
            .entry(entity_type)
            .or_default()
            .insert(source_uuid.to_string(), (id, uuid));
    }

    fn local_id(&self, entity_type: &str, source_uuid: Option<&str>) -> Option<i64> {
        let source_uuid = source_uuid?;
        self.uuid_map
            .get(entity_type)?
            .get(source_uuid)
            .map(|(id, _)| *id)
    }

    /// Store a blob from the package under the target infospace.
    async fn store_file(
        &self,
        zip_path: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Option<String> {
        let Some(bytes) = files.get(zip_path) else {
            warn!(zip_path, "file referenced in manifest but missing from package");
            return None;
        };
        let original_filename = zip_path.rsplit('/').next().unwrap_or("file");
        let new_path = format!(
            "infospaces/{}/imported_package_files/{}_{}",
            self.target_infospace_id,
            &Uuid::new_v4().simple().to_string()[..10],
            skein_common::secure_filename(original_filename)
        );
        match self.storage.upload(&new_path, bytes).await {
            Ok(()) => {
                info!(original_filename, new_path, "stored file from package");
                Some(new_path)
            }
            Err(e) => {
                warn!(zip_path, error = %e, "failed to store file from package");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Import a package of any type with the `skip` conflict strategy.
    pub async fn import_package(&mut self, package: &DataPackage) -> Result<ImportOutcome> {
        let mut outcome = ImportOutcome::default();
        match package.metadata.package_type {
            PackageType::Asset => {
                let asset_value = package
                    .content
                    .get("asset")
                    .ok_or_else(|| SkeinError::Validation("package has no asset".into()))?
                    .clone();
                let asset = self
                    .import_asset_value(&asset_value, &package.files, None, None, &mut outcome)
                    .await?;
                outcome.assets.push(asset);
            }
            PackageType::Source => {
                let source = self.import_source_package(package, &mut outcome).await?;
                outcome.sources.push(source);
            }
            PackageType::Schema => {
                let schema = self.import_schema_package(package).await?;
                outcome.schemas.push(schema);
            }
            PackageType::Run => {
                let run = self.import_run_package(package, &mut outcome).await?;
                outcome.runs.push(run);
            }
            PackageType::Bundle => {
                let bundle = self.import_bundle_package(package, &mut outcome).await?;
                outcome.bundles.push(bundle);
            }
            PackageType::Dataset => {
                let dataset = self.import_dataset_package(package, &mut outcome).await?;
                outcome.datasets.push(dataset);
            }
            PackageType::Mixed => {
                self.import_mixed_package(package, &mut outcome).await?;
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Source
    // ------------------------------------------------------------------

    pub async fn import_source_package(
        &mut self,
        package: &DataPackage,
        outcome: &mut ImportOutcome,
    ) -> Result<Source> {
        if package.metadata.package_type != PackageType::Source {
            return Err(SkeinError::Validation(
                "invalid package type for source import".into(),
            ));
        }
        let source_data = obj(
            package
                .content
                .get("source")
                .ok_or_else(|| SkeinError::Validation("package has no source".into()))?,
            "source",
        )?;
        let source_uuid = entity_uuid(&source_data);

        // Conflict strategy `skip`: a second import returns the first.
        if let Some(existing_id) = self.local_id(TYPE_SOURCE, Some(&source_uuid)) {
            info!(source_uuid, existing_id, "skipping already imported source");
            if let Some(existing) = self.store.get_source(existing_id).await? {
                return Ok(existing);
            }
            warn!(existing_id, "mapped source missing from store, re-importing");
        }

        let mut details = metadata_field(&source_data, "details");
        if let Some(main_file_reference) = str_field(&source_data, "main_file_reference") {
            match self.store_file(&main_file_reference, &package.files).await {
                Some(new_path) => {
                    details.insert("storage_path".into(), serde_json::json!(new_path));
                    details.insert(
                        "filename".into(),
                        serde_json::json!(main_file_reference
                            .rsplit('/')
                            .next()
                            .unwrap_or("file")),
                    );
                }
                None => {
                    details.remove("storage_path");
                }
            }
        }

        let source = self
            .store
            .create_source(SourceCreate {
                infospace_id: self.target_infospace_id,
                user_id: self.target_user_id,
                name: str_field(&source_data, "name")
                    .unwrap_or_else(|| format!("Imported Source {}", &source_uuid[..8])),
                kind: str_field(&source_data, "kind").unwrap_or_else(|| "unknown".to_string()),
                details,
                source_metadata: metadata_field(&source_data, "source_metadata"),
                imported_from_uuid: Some(source_uuid.clone()),
            })
            .await?;
        self.register(TYPE_SOURCE, &source_uuid, source.id, source.uuid.to_string());
        info!(source_id = source.id, name = %source.name, source_uuid, "imported source");

        if let Some(assets) = source_data.get("assets").and_then(|a| a.as_array()) {
            info!(count = assets.len(), "importing assets linked to source");
            for asset_value in assets {
                let asset = self
                    .import_asset_value(asset_value, &package.files, Some(source.id), None, outcome)
                    .await?;
                outcome.assets.push(asset);
            }
        }

        Ok(source)
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Import one asset record, recursing into `children_assets`.
    async fn import_asset_value(
        &mut self,
        asset_value: &Value,
        files: &BTreeMap<String, Vec<u8>>,
        parent_source_id: Option<i64>,
        parent_asset_id: Option<i64>,
        outcome: &mut ImportOutcome,
    ) -> Result<Asset> {
        let asset_data = obj(asset_value, "asset")?;
        let asset_uuid = entity_uuid(&asset_data);

        if let Some(existing_id) = self.local_id(TYPE_ASSET, Some(&asset_uuid)) {
            info!(asset_uuid, existing_id, "skipping already imported asset");
            if let Some(existing) = self.store.get_asset(existing_id).await? {
                return Ok(existing);
            }
            warn!(existing_id, "mapped asset missing from store, re-importing");
        }

        let new_blob_path = match str_field(&asset_data, "blob_file_reference") {
            Some(reference) => self.store_file(&reference, files).await,
            None => None,
        };

        let mut text_content = str_field(&asset_data, "text_content");
        if let Some(reference) = str_field(&asset_data, "text_content_file_reference") {
            match files.get(&reference) {
                Some(bytes) => {
                    text_content = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                None => warn!(reference, asset_uuid, "text content file missing from package"),
            }
        }

        let kind = str_field(&asset_data, "kind")
            .and_then(|k| k.parse::<AssetKind>().ok())
            .unwrap_or_else(|| {
                warn!(asset_uuid, "invalid or missing asset kind, defaulting to text");
                AssetKind::Text
            });

        let event_timestamp = str_field(&asset_data, "event_timestamp")
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        let mut create = AssetCreate::new(
            self.target_infospace_id,
            self.target_user_id,
            str_field(&asset_data, "title")
                .unwrap_or_else(|| format!("Imported Asset {}", &asset_uuid[..8])),
            kind,
        );
        create.parent_asset_id = parent_asset_id;
        create.source_id = parent_source_id;
        create.part_index = asset_data
            .get("part_index")
            .and_then(|p| p.as_i64())
            .map(|p| p as i32);
        create.blob_path = new_blob_path;
        create.text_content = text_content;
        create.source_identifier = str_field(&asset_data, "source_identifier");
        create.source_metadata = metadata_field(&asset_data, "source_metadata");
        create.content_hash = str_field(&asset_data, "content_hash");
        create.event_timestamp = event_timestamp;
        create.imported_from_uuid = Some(asset_uuid.clone());

        let asset = self.store.create_asset(create).await?;
        self.register(TYPE_ASSET, &asset_uuid, asset.id, asset.uuid.to_string());

        // Only roots of processable kinds are reprocessed; children come
        // back when processing runs.
        if parent_asset_id.is_none() && asset.kind.needs_processing() && asset.blob_path.is_some()
        {
            outcome.assets_needing_processing.push(asset.clone());
        }

        if let Some(children) = asset_data.get("children_assets").and_then(|c| c.as_array()) {
            info!(
                count = children.len(),
                parent = asset.id,
                "importing child assets"
            );
            for child_value in children {
                let child = Box::pin(self.import_asset_value(
                    child_value,
                    files,
                    parent_source_id,
                    Some(asset.id),
                    outcome,
                ))
                .await?;
                outcome.assets.push(child);
            }
        }

        if let Some(annotations) = asset_data.get("annotations").and_then(|a| a.as_array()) {
            self.import_annotations(asset.id, annotations, outcome).await?;
        }

        Ok(asset)
    }

    async fn import_annotations(
        &mut self,
        local_asset_id: i64,
        annotations: &[Value],
        outcome: &mut ImportOutcome,
    ) -> Result<()> {
        for annotation_value in annotations {
            let Ok(annotation_data) = obj(annotation_value, "annotation") else {
                warn!(local_asset_id, "annotation entry is not an object, skipping");
                continue;
            };
            let Some(annotation_uuid) = str_field(&annotation_data, "uuid") else {
                warn!(local_asset_id, "annotation without uuid, skipping");
                continue;
            };
            if self.local_id(TYPE_ANNOTATION, Some(&annotation_uuid)).is_some() {
                continue;
            }

            let schema_uuid = annotation_data
                .get("schema_reference")
                .and_then(|r| r.get("uuid"))
                .and_then(|u| u.as_str());
            let Some(local_schema_id) = self.local_id(TYPE_SCHEMA, schema_uuid) else {
                warn!(
                    annotation_uuid,
                    ?schema_uuid,
                    "skipping annotation with unmapped schema reference"
                );
                continue;
            };
            let run_uuid = annotation_data
                .get("run_reference")
                .and_then(|r| r.get("uuid"))
                .and_then(|u| u.as_str());
            let local_run_id = self.local_id(TYPE_RUN, run_uuid);

            let status = match str_field(&annotation_data, "status").as_deref() {
                Some("failed") => AnnotationStatus::Failed,
                _ => AnnotationStatus::Success,
            };

            let annotation = self
                .store
                .create_annotation(AnnotationCreate {
                    infospace_id: self.target_infospace_id,
                    user_id: self.target_user_id,
                    asset_id: local_asset_id,
                    schema_id: local_schema_id,
                    run_id: local_run_id,
                    value: annotation_data.get("value").cloned().unwrap_or_default(),
                    status,
                    error_message: str_field(&annotation_data, "error_message"),
                    region: annotation_data.get("region").filter(|v| !v.is_null()).cloned(),
                    links: annotation_data.get("links").filter(|v| !v.is_null()).cloned(),
                    event_timestamp: str_field(&annotation_data, "event_timestamp")
                        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
                        .map(|dt| dt.with_timezone(&chrono::Utc)),
                    imported_from_uuid: Some(annotation_uuid.clone()),
                })
                .await?;
            self.register(
                TYPE_ANNOTATION,
                &annotation_uuid,
                annotation.id,
                annotation.uuid.to_string(),
            );

            if let Some(justifications) = annotation_data
                .get("justifications")
                .and_then(|j| j.as_array())
            {
                for justification_value in justifications {
                    let Some(justification) = justification_value.as_object() else {
                        continue;
                    };
                    self.store
                        .create_justification(JustificationCreate {
                            annotation_id: annotation.id,
                            field_name: justification
                                .get("field_name")
                                .and_then(|f| f.as_str())
                                .map(String::from),
                            reasoning: justification
                                .get("reasoning")
                                .and_then(|r| r.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            evidence_payload: justification
                                .get("evidence_payload")
                                .and_then(|e| e.as_object())
                                .cloned()
                                .unwrap_or_default(),
                            score: justification.get("score").and_then(|s| s.as_f64()),
                            model_name: justification
                                .get("model_name")
                                .and_then(|m| m.as_str())
                                .map(String::from),
                        })
                        .await?;
                }
            }

            outcome.annotations.push(annotation);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub async fn import_schema_package(
        &mut self,
        package: &DataPackage,
    ) -> Result<AnnotationSchema> {
        if package.metadata.package_type != PackageType::Schema {
            return Err(SkeinError::Validation(
                "invalid package type for schema import".into(),
            ));
        }
        let schema_value = package
            .content
            .get("annotation_schema")
            .ok_or_else(|| SkeinError::Validation("package has no annotation_schema".into()))?
            .clone();
        self.import_schema_value(&schema_value).await
    }

    async fn import_schema_value(&mut self, schema_value: &Value) -> Result<AnnotationSchema> {
        let schema_data = obj(schema_value, "annotation_schema")?;
        let schema_uuid = entity_uuid(&schema_data);

        if let Some(existing_id) = self.local_id(TYPE_SCHEMA, Some(&schema_uuid)) {
            info!(schema_uuid, existing_id, "skipping already imported schema");
            if let Some(existing) = self.store.get_schema(existing_id).await? {
                return Ok(existing);
            }
            warn!(existing_id, "mapped schema missing from store, re-importing");
        }

        let target_level = match str_field(&schema_data, "target_level").as_deref() {
            Some("child") => SchemaTargetLevel::Child,
            _ => SchemaTargetLevel::Asset,
        };

        let schema = self
            .store
            .create_schema(SchemaCreate {
                infospace_id: self.target_infospace_id,
                user_id: self.target_user_id,
                name: str_field(&schema_data, "name")
                    .unwrap_or_else(|| format!("Imported Schema {}", &schema_uuid[..8])),
                version: str_field(&schema_data, "version").unwrap_or_else(|| "1.0".to_string()),
                description: str_field(&schema_data, "description"),
                output_contract: schema_data
                    .get("output_contract")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
                instructions: str_field(&schema_data, "instructions"),
                field_specific_justification_configs: metadata_field(
                    &schema_data,
                    "field_specific_justification_configs",
                ),
                target_level,
                imported_from_uuid: Some(schema_uuid.clone()),
            })
            .await?;
        self.register(TYPE_SCHEMA, &schema_uuid, schema.id, schema.uuid.to_string());
        info!(schema_id = schema.id, name = %schema.name, "imported annotation schema");
        Ok(schema)
    }

    // ------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------

    pub async fn import_run_package(
        &mut self,
        package: &DataPackage,
        outcome: &mut ImportOutcome,
    ) -> Result<AnnotationRun> {
        if package.metadata.package_type != PackageType::Run {
            return Err(SkeinError::Validation(
                "invalid package type for run import".into(),
            ));
        }
        let run_value = package
            .content
            .get("annotation_run")
            .ok_or_else(|| SkeinError::Validation("package has no annotation_run".into()))?
            .clone();
        self.import_run_value(&run_value, outcome).await
    }

    async fn import_run_value(
        &mut self,
        run_value: &Value,
        outcome: &mut ImportOutcome,
    ) -> Result<AnnotationRun> {
        let run_data = obj(run_value, "annotation_run")?;
        let run_uuid = entity_uuid(&run_data);

        if let Some(existing_id) = self.local_id(TYPE_RUN, Some(&run_uuid)) {
            info!(run_uuid, existing_id, "skipping already imported run");
            if let Some(existing) = self.store.get_run(existing_id).await? {
                return Ok(existing);
            }
            warn!(existing_id, "mapped run missing from store, re-importing");
        }

        let mut target_schema_ids = Vec::new();
        if let Some(references) = run_data
            .get("target_schema_references")
            .and_then(|r| r.as_array())
        {
            for reference in references {
                let schema_uuid = reference.get("uuid").and_then(|u| u.as_str());
                match self.local_id(TYPE_SCHEMA, schema_uuid) {
                    Some(id) => target_schema_ids.push(id),
                    None => warn!(run_uuid, ?schema_uuid, "unmapped schema reference on run"),
                }
            }
        }

        let run = self
            .store
            .create_run(RunCreate {
                infospace_id: self.target_infospace_id,
                user_id: self.target_user_id,
                name: str_field(&run_data, "name")
                    .unwrap_or_else(|| format!("Imported Run {}", &run_uuid[..8])),
                configuration: metadata_field(&run_data, "configuration"),
                target_schema_ids,
                target_asset_ids: Vec::new(),
                include_parent_context: run_data
                    .get("include_parent_context")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                context_window: run_data
                    .get("context_window")
                    .and_then(|v| v.as_i64())
                    .map(|v| v as i32),
                imported_from_uuid: Some(run_uuid.clone()),
            })
            .await?;
        self.register(TYPE_RUN, &run_uuid, run.id, run.uuid.to_string());
        info!(run_id = run.id, name = %run.name, "imported annotation run");

        if let Some(annotations) = run_data.get("annotations").and_then(|a| a.as_array()) {
            for annotation_value in annotations {
                let Ok(annotation_data) = obj(annotation_value, "annotation") else {
                    continue;
                };
                let asset_uuid = annotation_data
                    .get("asset_reference")
                    .and_then(|r| r.get("uuid"))
                    .and_then(|u| u.as_str());
                let Some(local_asset_id) = self.local_id(TYPE_ASSET, asset_uuid) else {
                    warn!(?asset_uuid, "skipping run annotation with unmapped asset");
                    continue;
                };
                self.import_annotations(
                    local_asset_id,
                    std::slice::from_ref(annotation_value),
                    outcome,
                )
                .await?;
            }
        }

        Ok(run)
    }

    // ------------------------------------------------------------------
    // Bundle
    // ------------------------------------------------------------------

    pub async fn import_bundle_package(
        &mut self,
        package: &DataPackage,
        outcome: &mut ImportOutcome,
    ) -> Result<Bundle> {
        if package.metadata.package_type != PackageType::Bundle {
            return Err(SkeinError::Validation(
                "invalid package type for bundle import".into(),
            ));
        }
        let bundle_value = package
            .content
            .get("bundle")
            .ok_or_else(|| SkeinError::Validation("package has no bundle".into()))?
            .clone();
        self.import_bundle_value(&bundle_value, &package.files, outcome)
            .await
    }

    async fn import_bundle_value(
        &mut self,
        bundle_value: &Value,
        files: &BTreeMap<String, Vec<u8>>,
        outcome: &mut ImportOutcome,
    ) -> Result<Bundle> {
        let bundle_data = obj(bundle_value, "bundle")?;
        let bundle_uuid = entity_uuid(&bundle_data);

        if let Some(existing_id) = self.local_id(TYPE_BUNDLE, Some(&bundle_uuid)) {
            info!(bundle_uuid, existing_id, "skipping already imported bundle");
            if let Some(existing) = self.store.get_bundle(existing_id).await? {
                return Ok(existing);
            }
            warn!(existing_id, "mapped bundle missing from store, re-importing");
        }

        let bundle = self
            .store
            .create_bundle(BundleCreate {
                infospace_id: self.target_infospace_id,
                user_id: self.target_user_id,
                name: str_field(&bundle_data, "name")
                    .unwrap_or_else(|| format!("Imported Bundle {}", &bundle_uuid[..8])),
                purpose: str_field(&bundle_data, "purpose"),
                imported_from_uuid: Some(bundle_uuid.clone()),
            })
            .await?;
        self.register(TYPE_BUNDLE, &bundle_uuid, bundle.id, bundle.uuid.to_string());

        if let Some(references) = bundle_data.get("asset_references").and_then(|r| r.as_array()) {
            for reference in references {
                let local_asset_id = if let Some(full_content) = reference.get("full_content") {
                    let asset = self
                        .import_asset_value(full_content, files, None, None, outcome)
                        .await?;
                    let id = asset.id;
                    outcome.assets.push(asset);
                    Some(id)
                } else {
                    let asset_uuid = reference.get("uuid").and_then(|u| u.as_str());
                    let mapped = self.local_id(TYPE_ASSET, asset_uuid);
                    if mapped.is_none() {
                        warn!(?asset_uuid, "bundle references an asset not in this import");
                    }
                    mapped
                };
                if let Some(asset_id) = local_asset_id {
                    self.store.link_asset_to_bundle(bundle.id, asset_id).await?;
                }
            }
        }

        info!(bundle_id = bundle.id, name = %bundle.name, "imported bundle");
        self.store
            .get_bundle(bundle.id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("bundle {}", bundle.id)))
    }

    // ------------------------------------------------------------------
    // Dataset
    // ------------------------------------------------------------------

    /// Dataset order: assets, then schemas, then runs (runs may reference
    /// both). Asset annotations are deferred until schemas exist so their
    /// schema references resolve.
    pub async fn import_dataset_package(
        &mut self,
        package: &DataPackage,
        outcome: &mut ImportOutcome,
    ) -> Result<Dataset> {
        if package.metadata.package_type != PackageType::Dataset {
            return Err(SkeinError::Validation(
                "invalid package type for dataset import".into(),
            ));
        }
        let dataset_data = obj(
            package
                .content
                .get("dataset")
                .ok_or_else(|| SkeinError::Validation("package has no dataset".into()))?,
            "dataset",
        )?;
        let dataset_uuid = entity_uuid(&dataset_data);

        if let Some(existing_id) = self.local_id(TYPE_DATASET, Some(&dataset_uuid)) {
            info!(dataset_uuid, existing_id, "skipping already imported dataset");
            if let Some(existing) = self.store.get_dataset(existing_id).await? {
                return Ok(existing);
            }
        }

        // Assets first, annotations deferred.
        let mut deferred_annotations: Vec<(i64, Value)> = Vec::new();
        let mut asset_ids = Vec::new();
        if let Some(assets) = dataset_data.get("assets").and_then(|a| a.as_array()) {
            for asset_value in assets {
                let mut stripped = asset_value.clone();
                let annotations = stripped
                    .as_object_mut()
                    .and_then(|o| o.remove("annotations"));
                let asset = self
                    .import_asset_value(&stripped, &package.files, None, None, outcome)
                    .await?;
                if let Some(annotations) = annotations {
                    deferred_annotations.push((asset.id, annotations));
                }
                asset_ids.push(asset.id);
                outcome.assets.push(asset);
            }
        }

        // Then schemas.
        let mut schema_ids = Vec::new();
        if let Some(schemas) = dataset_data
            .get("annotation_schemas")
            .and_then(|s| s.as_array())
        {
            for schema_value in schemas {
                let schema = self.import_schema_value(schema_value).await?;
                schema_ids.push(schema.id);
                outcome.schemas.push(schema);
            }
        }

        // Then runs.
        let mut run_ids = Vec::new();
        if let Some(runs) = dataset_data.get("annotation_runs").and_then(|r| r.as_array()) {
            for run_value in runs {
                let run = self.import_run_value(run_value, outcome).await?;
                run_ids.push(run.id);
                outcome.runs.push(run);
            }
        }

        // Asset annotations, now that schema and run references resolve.
        for (asset_id, annotations) in deferred_annotations {
            if let Some(annotations) = annotations.as_array() {
                self.import_annotations(asset_id, annotations, outcome).await?;
            }
        }

        let dataset = self
            .store
            .create_dataset(DatasetCreate {
                infospace_id: self.target_infospace_id,
                user_id: self.target_user_id,
                name: str_field(&dataset_data, "name")
                    .unwrap_or_else(|| format!("Imported Dataset {}", &dataset_uuid[..8])),
                description: str_field(&dataset_data, "description"),
                asset_ids,
                schema_ids,
                run_ids,
                imported_from_uuid: Some(dataset_uuid.clone()),
            })
            .await?;
        self.register(TYPE_DATASET, &dataset_uuid, dataset.id, dataset.uuid.to_string());
        info!(dataset_id = dataset.id, name = %dataset.name, "imported dataset");
        Ok(dataset)
    }

    // ------------------------------------------------------------------
    // Mixed
    // ------------------------------------------------------------------

    /// Standalone assets first (no parent source), then bundles; bundle
    /// asset references reuse the asset import path.
    pub async fn import_mixed_package(
        &mut self,
        package: &DataPackage,
        outcome: &mut ImportOutcome,
    ) -> Result<()> {
        if package.metadata.package_type != PackageType::Mixed {
            return Err(SkeinError::Validation(
                "invalid package type for mixed import".into(),
            ));
        }

        if let Some(assets) = package.content.get("assets").and_then(|a| a.as_array()) {
            for asset_value in assets {
                let asset = self
                    .import_asset_value(asset_value, &package.files, None, None, outcome)
                    .await?;
                outcome.assets.push(asset);
            }
        }

        if let Some(bundles) = package.content.get("bundles").and_then(|b| b.as_array()) {
            for bundle_value in bundles {
                let bundle = self
                    .import_bundle_value(bundle_value, &package.files, outcome)
                    .await?;
                outcome.bundles.push(bundle);
            }
        }

        Ok(())
    }
}
