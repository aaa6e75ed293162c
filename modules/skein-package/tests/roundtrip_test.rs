//! Export/import round trips across a simulated pair of instances.

use std::sync::Arc;

use skein_common::{
    AnnotationCreate, AnnotationStatus, AssetCreate, AssetKind, BundleCreate, SchemaCreate,
    SchemaTargetLevel, SourceCreate,
};
use skein_package::{DataPackage, PackageBuilder, PackageImporter};
use skein_store::{BlobStorage, MemoryStorage, MemoryStore, Store};

struct Instance {
    store: Arc<MemoryStore>,
    storage: Arc<MemoryStorage>,
}

impl Instance {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    fn builder(&self, instance_id: &str) -> PackageBuilder {
        PackageBuilder::new(self.store.clone(), self.storage.clone(), instance_id)
    }

    fn importer(&self) -> PackageImporter {
        PackageImporter::new(self.store.clone(), self.storage.clone(), 9, 9)
    }
}

/// Source with two assets, each carrying one annotation.
async fn seed_source(instance: &Instance) -> (i64, i64) {
    let store = &instance.store;

    let schema = store
        .create_schema(SchemaCreate {
            infospace_id: 1,
            user_id: 1,
            name: "sentiment".into(),
            version: "1.0".into(),
            description: None,
            output_contract: serde_json::json!({
                "type": "object",
                "properties": {"sentiment": {"type": "string"}},
                "required": ["sentiment"]
            }),
            instructions: None,
            field_specific_justification_configs: Default::default(),
            target_level: SchemaTargetLevel::Asset,
            imported_from_uuid: None,
        })
        .await
        .unwrap();

    let source = store
        .create_source(SourceCreate {
            infospace_id: 1,
            user_id: 1,
            name: "upload batch".into(),
            kind: "file_upload".into(),
            details: Default::default(),
            source_metadata: Default::default(),
            imported_from_uuid: None,
        })
        .await
        .unwrap();

    for i in 0..2 {
        let blob_path = format!("user_1/doc{i}.txt");
        instance
            .storage
            .upload(&blob_path, format!("document {i}").as_bytes())
            .await
            .unwrap();

        let mut create = AssetCreate::new(1, 1, format!("doc{i}.txt"), AssetKind::Text);
        create.source_id = Some(source.id);
        create.blob_path = Some(blob_path);
        create.text_content = Some(format!("document {i}"));
        let asset = store.create_asset(create).await.unwrap();

        store
            .create_annotation(AnnotationCreate {
                infospace_id: 1,
                user_id: 1,
                asset_id: asset.id,
                schema_id: schema.id,
                run_id: None,
                value: serde_json::json!({"sentiment": "positive"}),
                status: AnnotationStatus::Success,
                error_message: None,
                region: None,
                links: None,
                event_timestamp: None,
                imported_from_uuid: None,
            })
            .await
            .unwrap();
    }

    (source.id, schema.id)
}

#[tokio::test]
async fn test_source_round_trip() {
    let origin = Instance::new();
    let (source_id, schema_id) = seed_source(&origin).await;

    let builder = origin.builder("instance-a");
    let schema_package = builder.build_schema_package(schema_id).await.unwrap();
    let source_package = builder.build_source_package(source_id, true).await.unwrap();

    // Through actual ZIP bytes, like a real transfer.
    let schema_bytes = schema_package.to_zip_bytes().unwrap();
    let source_bytes = source_package.to_zip_bytes().unwrap();

    let target = Instance::new();
    let mut importer = target.importer();

    let schema_package = DataPackage::from_zip_bytes(&schema_bytes).unwrap();
    let source_package = DataPackage::from_zip_bytes(&source_bytes).unwrap();
    assert_eq!(source_package.metadata.source_instance_id, "instance-a");

    let schema_outcome = importer.import_package(&schema_package).await.unwrap();
    assert_eq!(schema_outcome.schemas.len(), 1);

    let outcome = importer.import_package(&source_package).await.unwrap();
    assert_eq!(outcome.sources.len(), 1);
    assert_eq!(outcome.assets.len(), 2);
    assert_eq!(outcome.annotations.len(), 2);

    let imported_source = &outcome.sources[0];
    assert!(imported_source.imported_from_uuid.is_some());
    assert_eq!(imported_source.infospace_id, 9);

    for asset in &outcome.assets {
        assert!(asset.imported_from_uuid.is_some());
        assert_eq!(asset.infospace_id, 9);
        // Blob landed in the target storage under the import prefix.
        let blob_path = asset.blob_path.as_deref().unwrap();
        assert!(blob_path.starts_with("infospaces/9/imported_package_files/"));
        assert!(target.storage.exists(blob_path).await.unwrap());
    }

    let linked = target
        .store
        .list_assets_by_source(imported_source.id)
        .await
        .unwrap();
    assert_eq!(linked.len(), 2);

    for annotation in &outcome.annotations {
        assert!(annotation.imported_from_uuid.is_some());
        assert_eq!(annotation.value["sentiment"], "positive");
    }
}

#[tokio::test]
async fn test_second_import_is_noop() {
    let origin = Instance::new();
    let (source_id, _) = seed_source(&origin).await;

    let builder = origin.builder("instance-a");
    let package = builder.build_source_package(source_id, true).await.unwrap();
    let bytes = package.to_zip_bytes().unwrap();

    let target = Instance::new();
    let mut importer = target.importer();

    let package = DataPackage::from_zip_bytes(&bytes).unwrap();
    let first = importer.import_package(&package).await.unwrap();
    let second = importer.import_package(&package).await.unwrap();

    // Skip strategy: the second import returns the first source.
    assert_eq!(first.sources[0].id, second.sources[0].id);
    let all = target
        .store
        .list_assets_by_source(first.sources[0].id)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_mixed_package_round_trip() {
    let origin = Instance::new();
    let store = &origin.store;

    let mut standalone = AssetCreate::new(1, 1, "note".to_string(), AssetKind::Text);
    standalone.text_content = Some("a note".into());
    let standalone = store.create_asset(standalone).await.unwrap();

    let bundle = store
        .create_bundle(BundleCreate {
            infospace_id: 1,
            user_id: 1,
            name: "my picks".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut bundled = AssetCreate::new(1, 1, "picked".to_string(), AssetKind::Text);
    bundled.text_content = Some("picked content".into());
    let bundled = store.create_asset(bundled).await.unwrap();
    store
        .link_asset_to_bundle(bundle.id, bundled.id)
        .await
        .unwrap();

    let builder = origin.builder("instance-a");
    let package = builder
        .build_mixed_package(&[standalone.id], &[bundle.id], true, false)
        .await
        .unwrap();
    let bytes = package.to_zip_bytes().unwrap();

    let target = Instance::new();
    let mut importer = target.importer();
    let package = DataPackage::from_zip_bytes(&bytes).unwrap();
    let outcome = importer.import_package(&package).await.unwrap();

    assert_eq!(outcome.bundles.len(), 1);
    assert_eq!(outcome.assets.len(), 2);
    let imported_bundle = &outcome.bundles[0];
    assert_eq!(imported_bundle.asset_count, 1);
    let members = target
        .store
        .bundle_asset_ids(imported_bundle.id)
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
}

#[tokio::test]
async fn test_processable_imports_are_flagged() {
    let origin = Instance::new();
    origin
        .storage
        .upload("user_1/data.csv", b"a,b\n1,2\n")
        .await
        .unwrap();
    let mut create = AssetCreate::new(1, 1, "data.csv", AssetKind::Csv);
    create.blob_path = Some("user_1/data.csv".into());
    let asset = origin.store.create_asset(create).await.unwrap();

    let builder = origin.builder("instance-a");
    let package = builder
        .build_asset_package(asset.id, false, false, false)
        .await
        .unwrap();

    let target = Instance::new();
    let mut importer = target.importer();
    let outcome = importer.import_package(&package).await.unwrap();

    assert_eq!(outcome.assets_needing_processing.len(), 1);
    assert_eq!(outcome.assets_needing_processing[0].kind, AssetKind::Csv);
}
