//! In-memory store used by tests and single-process development runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use skein_common::{
    Annotation, AnnotationCreate, AnnotationRun, AnnotationSchema, Asset, AssetCreate, Bundle,
    BundleCreate, Dataset, DatasetCreate, Justification, JustificationCreate, ProcessingStatus,
    Result, RunCreate, RunStatus, SchemaCreate, SkeinError, Source, SourceCreate, SourceStatus,
};

use crate::store::Store;

#[derive(Default)]
struct State {
    next_id: i64,
    members: HashSet<(i64, i64)>,
    assets: HashMap<i64, Asset>,
    sources: HashMap<i64, Source>,
    bundles: HashMap<i64, Bundle>,
    bundle_links: HashSet<(i64, i64)>,
    schemas: HashMap<i64, AnnotationSchema>,
    runs: HashMap<i64, AnnotationRun>,
    annotations: HashMap<i64, Annotation>,
    annotation_keys: HashSet<(i64, i64, Option<i64>)>,
    justifications: HashMap<i64, Justification>,
    datasets: HashMap<i64, Dataset>,
}

impl State {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a user access to an infospace. Test/dev convenience; the
    /// Postgres store reads this from a membership table.
    pub fn grant_access(&self, infospace_id: i64, user_id: i64) {
        self.state
            .lock()
            .expect("memory store poisoned")
            .members
            .insert((infospace_id, user_id));
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn check_infospace_access(&self, infospace_id: i64, user_id: i64) -> Result<bool> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.members.contains(&(infospace_id, user_id)))
    }

    async fn create_asset(&self, create: AssetCreate) -> Result<Asset> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let asset = Asset {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            title: create.title,
            kind: create.kind.unwrap_or(skein_common::AssetKind::File),
            parent_asset_id: create.parent_asset_id,
            source_id: create.source_id,
            part_index: create.part_index,
            blob_path: create.blob_path,
            text_content: create.text_content,
            source_identifier: create.source_identifier,
            source_metadata: create.source_metadata,
            event_timestamp: create.event_timestamp,
            content_hash: create.content_hash,
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.assets.insert(id, asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.assets.get(&id).cloned())
    }

    async fn update_asset(&self, asset: &Asset) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if !state.assets.contains_key(&asset.id) {
            return Err(SkeinError::NotFound(format!("asset {}", asset.id)));
        }
        state.assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn delete_asset(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        state.assets.remove(&id);
        let links: Vec<(i64, i64)> = state
            .bundle_links
            .iter()
            .filter(|(_, a)| *a == id)
            .copied()
            .collect();
        for link in links {
            state.bundle_links.remove(&link);
            if let Some(bundle) = state.bundles.get_mut(&link.0) {
                bundle.asset_count -= 1;
            }
        }
        Ok(())
    }

    async fn list_children(&self, parent_asset_id: i64) -> Result<Vec<Asset>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut children: Vec<Asset> = state
            .assets
            .values()
            .filter(|a| a.parent_asset_id == Some(parent_asset_id))
            .cloned()
            .collect();
        // NULL part_index sorts last, matching the Postgres ordering.
        children.sort_by_key(|a| (a.part_index.is_none(), a.part_index, a.created_at, a.id));
        Ok(children)
    }

    async fn delete_children(&self, parent_asset_id: i64) -> Result<u64> {
        let ids: Vec<i64> = {
            let state = self.state.lock().expect("memory store poisoned");
            state
                .assets
                .values()
                .filter(|a| a.parent_asset_id == Some(parent_asset_id))
                .map(|a| a.id)
                .collect()
        };
        for id in &ids {
            // Grandchildren first (Excel sheets own row assets).
            let grandchildren = self.list_children(*id).await?;
            for grandchild in grandchildren {
                self.delete_asset(grandchild.id).await?;
            }
            self.delete_asset(*id).await?;
        }
        Ok(ids.len() as u64)
    }

    async fn list_assets_by_source(&self, source_id: i64) -> Result<Vec<Asset>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut assets: Vec<Asset> = state
            .assets
            .values()
            .filter(|a| a.source_id == Some(source_id))
            .cloned()
            .collect();
        assets.sort_by_key(|a| a.id);
        Ok(assets)
    }

    async fn create_source(&self, create: SourceCreate) -> Result<Source> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let source = Source {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            name: create.name,
            kind: create.kind,
            details: create.details,
            source_metadata: create.source_metadata,
            status: SourceStatus::Pending,
            error_message: None,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.sources.insert(id, source.clone());
        Ok(source)
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.sources.get(&id).cloned())
    }

    async fn update_source_status(
        &self,
        id: i64,
        status: SourceStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let source = state
            .sources
            .get_mut(&id)
            .ok_or_else(|| SkeinError::NotFound(format!("source {id}")))?;
        source.status = status;
        source.error_message = error_message;
        Ok(())
    }

    async fn create_bundle(&self, create: BundleCreate) -> Result<Bundle> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let bundle = Bundle {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            name: create.name,
            purpose: create.purpose,
            asset_count: 0,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.bundles.insert(id, bundle.clone());
        Ok(bundle)
    }

    async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.bundles.get(&id).cloned())
    }

    async fn link_asset_to_bundle(&self, bundle_id: i64, asset_id: i64) -> Result<bool> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if !state.bundles.contains_key(&bundle_id) {
            return Err(SkeinError::NotFound(format!("bundle {bundle_id}")));
        }
        let inserted = state.bundle_links.insert((bundle_id, asset_id));
        if inserted {
            if let Some(bundle) = state.bundles.get_mut(&bundle_id) {
                bundle.asset_count += 1;
            }
        }
        Ok(inserted)
    }

    async fn bundle_asset_ids(&self, bundle_id: i64) -> Result<Vec<i64>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut ids: Vec<i64> = state
            .bundle_links
            .iter()
            .filter(|(b, _)| *b == bundle_id)
            .map(|(_, a)| *a)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn create_schema(&self, create: SchemaCreate) -> Result<AnnotationSchema> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let schema = AnnotationSchema {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            name: create.name,
            version: create.version,
            description: create.description,
            output_contract: create.output_contract,
            instructions: create.instructions,
            field_specific_justification_configs: create.field_specific_justification_configs,
            target_level: create.target_level,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.schemas.insert(id, schema.clone());
        Ok(schema)
    }

    async fn get_schema(&self, id: i64) -> Result<Option<AnnotationSchema>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.schemas.get(&id).cloned())
    }

    async fn schema_version_exists(&self, uuid: &str, version: &str) -> Result<bool> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state
            .schemas
            .values()
            .any(|s| s.uuid.to_string() == uuid && s.version == version))
    }

    async fn create_run(&self, create: RunCreate) -> Result<AnnotationRun> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let run = AnnotationRun {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            name: create.name,
            status: RunStatus::Pending,
            configuration: create.configuration,
            target_schema_ids: create.target_schema_ids,
            target_asset_ids: create.target_asset_ids,
            include_parent_context: create.include_parent_context,
            context_window: create.context_window,
            error_message: None,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: i64) -> Result<Option<AnnotationRun>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.runs.get(&id).cloned())
    }

    async fn update_run_status(
        &self,
        id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| SkeinError::NotFound(format!("run {id}")))?;
        run.status = status;
        run.error_message = error_message;
        Ok(())
    }

    async fn delete_run(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        state.runs.remove(&id);
        let annotation_ids: Vec<i64> = state
            .annotations
            .values()
            .filter(|a| a.run_id == Some(id))
            .map(|a| a.id)
            .collect();
        for ann_id in annotation_ids {
            if let Some(ann) = state.annotations.remove(&ann_id) {
                state
                    .annotation_keys
                    .remove(&(ann.asset_id, ann.schema_id, ann.run_id));
            }
            state.justifications.retain(|_, j| j.annotation_id != ann_id);
        }
        Ok(())
    }

    async fn create_annotation(&self, create: AnnotationCreate) -> Result<Annotation> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let key = (create.asset_id, create.schema_id, create.run_id);
        if !state.annotation_keys.insert(key) {
            return Err(SkeinError::Validation(format!(
                "annotation already exists for asset {} schema {} run {:?}",
                create.asset_id, create.schema_id, create.run_id
            )));
        }
        let id = state.next();
        let annotation = Annotation {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            asset_id: create.asset_id,
            schema_id: create.schema_id,
            run_id: create.run_id,
            value: create.value,
            status: create.status,
            error_message: create.error_message,
            region: create.region,
            links: create.links,
            event_timestamp: create.event_timestamp,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.annotations.insert(id, annotation.clone());
        Ok(annotation)
    }

    async fn list_annotations_for_asset(&self, asset_id: i64) -> Result<Vec<Annotation>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut annotations: Vec<Annotation> = state
            .annotations
            .values()
            .filter(|a| a.asset_id == asset_id)
            .cloned()
            .collect();
        annotations.sort_by_key(|a| a.id);
        Ok(annotations)
    }

    async fn list_annotations_for_run(&self, run_id: i64) -> Result<Vec<Annotation>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut annotations: Vec<Annotation> = state
            .annotations
            .values()
            .filter(|a| a.run_id == Some(run_id))
            .cloned()
            .collect();
        annotations.sort_by_key(|a| a.id);
        Ok(annotations)
    }

    async fn create_justification(&self, create: JustificationCreate) -> Result<Justification> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let justification = Justification {
            id,
            annotation_id: create.annotation_id,
            field_name: create.field_name,
            reasoning: create.reasoning,
            evidence_payload: create.evidence_payload,
            score: create.score,
            model_name: create.model_name,
        };
        state.justifications.insert(id, justification.clone());
        Ok(justification)
    }

    async fn list_justifications(&self, annotation_id: i64) -> Result<Vec<Justification>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut justifications: Vec<Justification> = state
            .justifications
            .values()
            .filter(|j| j.annotation_id == annotation_id)
            .cloned()
            .collect();
        justifications.sort_by_key(|j| j.id);
        Ok(justifications)
    }

    async fn create_dataset(&self, create: DatasetCreate) -> Result<Dataset> {
        let mut state = self.state.lock().expect("memory store poisoned");
        let id = state.next();
        let dataset = Dataset {
            id,
            uuid: Uuid::new_v4(),
            infospace_id: create.infospace_id,
            user_id: create.user_id,
            name: create.name,
            description: create.description,
            asset_ids: create.asset_ids,
            schema_ids: create.schema_ids,
            run_ids: create.run_ids,
            imported_from_uuid: create.imported_from_uuid,
            created_at: Utc::now(),
        };
        state.datasets.insert(id, dataset.clone());
        Ok(dataset)
    }

    async fn get_dataset(&self, id: i64) -> Result<Option<Dataset>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.datasets.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_common::AssetKind;

    #[tokio::test]
    async fn test_bundle_link_dedup() {
        let store = MemoryStore::new();
        let bundle = store
            .create_bundle(BundleCreate {
                infospace_id: 1,
                user_id: 1,
                name: "b".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.link_asset_to_bundle(bundle.id, 42).await.unwrap());
        assert!(!store.link_asset_to_bundle(bundle.id, 42).await.unwrap());

        let bundle = store.get_bundle(bundle.id).await.unwrap().unwrap();
        assert_eq!(bundle.asset_count, 1);
        assert_eq!(store.bundle_asset_ids(bundle.id).await.unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_children_ordered_by_part_index() {
        let store = MemoryStore::new();
        let parent = store
            .create_asset(AssetCreate::new(1, 1, "parent", AssetKind::Csv))
            .await
            .unwrap();
        for idx in [2, 0, 1] {
            let mut create = AssetCreate::new(1, 1, format!("row {idx}"), AssetKind::CsvRow);
            create.parent_asset_id = Some(parent.id);
            create.part_index = Some(idx);
            store.create_asset(create).await.unwrap();
        }
        let children = store.list_children(parent.id).await.unwrap();
        let indices: Vec<i32> = children.iter().filter_map(|c| c.part_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_annotation_uniqueness() {
        let store = MemoryStore::new();
        let create = AnnotationCreate {
            infospace_id: 1,
            user_id: 1,
            asset_id: 10,
            schema_id: 20,
            run_id: Some(30),
            value: serde_json::json!({"sentiment": "positive"}),
            status: skein_common::AnnotationStatus::Success,
            error_message: None,
            region: None,
            links: None,
            event_timestamp: None,
            imported_from_uuid: None,
        };
        store.create_annotation(create.clone()).await.unwrap();
        assert!(store.create_annotation(create).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_run_cascades_annotations() {
        let store = MemoryStore::new();
        let run = store
            .create_run(RunCreate {
                infospace_id: 1,
                user_id: 1,
                name: "run".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_annotation(AnnotationCreate {
                infospace_id: 1,
                user_id: 1,
                asset_id: 1,
                schema_id: 1,
                run_id: Some(run.id),
                value: serde_json::json!({}),
                status: skein_common::AnnotationStatus::Success,
                error_message: None,
                region: None,
                links: None,
                event_timestamp: None,
                imported_from_uuid: None,
            })
            .await
            .unwrap();

        store.delete_run(run.id).await.unwrap();
        assert!(store
            .list_annotations_for_run(run.id)
            .await
            .unwrap()
            .is_empty());
    }
}
