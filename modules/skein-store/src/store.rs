use async_trait::async_trait;

use skein_common::{
    Annotation, AnnotationCreate, AnnotationRun, AnnotationSchema, Asset, AssetCreate, Bundle,
    BundleCreate, Dataset, DatasetCreate, Justification, JustificationCreate, Result, RunCreate,
    RunStatus, SchemaCreate, Source, SourceCreate, SourceStatus,
};

/// Abstract persistence boundary. The relational schema itself is an
/// implementation detail; callers only see domain entities.
///
/// Implementations: [`crate::MemoryStore`] for tests and development,
/// [`crate::PgStore`] for Postgres.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Infospace membership ---

    async fn check_infospace_access(&self, infospace_id: i64, user_id: i64) -> Result<bool>;

    // --- Assets ---

    async fn create_asset(&self, create: AssetCreate) -> Result<Asset>;
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>>;
    /// Full-row update keyed by `asset.id`.
    async fn update_asset(&self, asset: &Asset) -> Result<()>;
    async fn delete_asset(&self, id: i64) -> Result<()>;
    /// Children of a parent, ordered by part_index then created_at.
    async fn list_children(&self, parent_asset_id: i64) -> Result<Vec<Asset>>;
    /// Delete all children of a parent; returns the number removed.
    async fn delete_children(&self, parent_asset_id: i64) -> Result<u64>;
    async fn list_assets_by_source(&self, source_id: i64) -> Result<Vec<Asset>>;

    // --- Sources ---

    async fn create_source(&self, create: SourceCreate) -> Result<Source>;
    async fn get_source(&self, id: i64) -> Result<Option<Source>>;
    async fn update_source_status(
        &self,
        id: i64,
        status: SourceStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    // --- Bundles ---

    async fn create_bundle(&self, create: BundleCreate) -> Result<Bundle>;
    async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>>;
    /// Link an asset into a bundle. Returns false when the link already
    /// existed; `asset_count` is only incremented for new links.
    async fn link_asset_to_bundle(&self, bundle_id: i64, asset_id: i64) -> Result<bool>;
    async fn bundle_asset_ids(&self, bundle_id: i64) -> Result<Vec<i64>>;

    // --- Annotation schemas ---

    async fn create_schema(&self, create: SchemaCreate) -> Result<AnnotationSchema>;
    async fn get_schema(&self, id: i64) -> Result<Option<AnnotationSchema>>;
    async fn schema_version_exists(&self, uuid: &str, version: &str) -> Result<bool>;

    // --- Annotation runs ---

    async fn create_run(&self, create: RunCreate) -> Result<AnnotationRun>;
    async fn get_run(&self, id: i64) -> Result<Option<AnnotationRun>>;
    async fn update_run_status(
        &self,
        id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    /// Deleting a run cascades to its annotations.
    async fn delete_run(&self, id: i64) -> Result<()>;

    // --- Annotations ---

    /// Unique on (asset_id, schema_id, run_id); duplicate inserts fail
    /// with a validation error.
    async fn create_annotation(&self, create: AnnotationCreate) -> Result<Annotation>;
    async fn list_annotations_for_asset(&self, asset_id: i64) -> Result<Vec<Annotation>>;
    async fn list_annotations_for_run(&self, run_id: i64) -> Result<Vec<Annotation>>;

    // --- Justifications ---

    async fn create_justification(&self, create: JustificationCreate) -> Result<Justification>;
    async fn list_justifications(&self, annotation_id: i64) -> Result<Vec<Justification>>;

    // --- Datasets ---

    async fn create_dataset(&self, create: DatasetCreate) -> Result<Dataset>;
    async fn get_dataset(&self, id: i64) -> Result<Option<Dataset>>;
}
