//! Postgres persistence for the skein store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use skein_common::{
    Annotation, AnnotationCreate, AnnotationRun, AnnotationSchema, AnnotationStatus, Asset,
    AssetCreate, AssetKind, Bundle, BundleCreate, Dataset, DatasetCreate, Justification,
    JustificationCreate, Metadata, ProcessingStatus, Result, RunCreate, RunStatus, SchemaCreate,
    SchemaTargetLevel, SkeinError, Source, SourceCreate, SourceStatus,
};

use crate::store::Store;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SkeinError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> SkeinError {
    SkeinError::Database(e.to_string())
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse().map_err(SkeinError::Database)
}

// --- Row types ---

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    title: String,
    kind: String,
    parent_asset_id: Option<i64>,
    source_id: Option<i64>,
    part_index: Option<i32>,
    blob_path: Option<String>,
    text_content: Option<String>,
    source_identifier: Option<String>,
    source_metadata: Json<Metadata>,
    event_timestamp: Option<DateTime<Utc>>,
    content_hash: Option<String>,
    processing_status: String,
    processing_error: Option<String>,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl AssetRow {
    fn into_asset(self) -> Result<Asset> {
        Ok(Asset {
            id: self.id,
            uuid: self.uuid,
            infospace_id: self.infospace_id,
            user_id: self.user_id,
            title: self.title,
            kind: parse_status::<AssetKind>(&self.kind)?,
            parent_asset_id: self.parent_asset_id,
            source_id: self.source_id,
            part_index: self.part_index,
            blob_path: self.blob_path,
            text_content: self.text_content,
            source_identifier: self.source_identifier,
            source_metadata: self.source_metadata.0,
            event_timestamp: self.event_timestamp,
            content_hash: self.content_hash,
            processing_status: parse_status::<ProcessingStatus>(&self.processing_status)?,
            processing_error: self.processing_error,
            imported_from_uuid: self.imported_from_uuid,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    name: String,
    kind: String,
    details: Json<Metadata>,
    source_metadata: Json<Metadata>,
    status: String,
    error_message: Option<String>,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl SourceRow {
    fn into_source(self) -> Result<Source> {
        let status = match self.status.as_str() {
            "pending" => SourceStatus::Pending,
            "processing" => SourceStatus::Processing,
            "complete" => SourceStatus::Complete,
            "failed" => SourceStatus::Failed,
            other => return Err(SkeinError::Database(format!("unknown SourceStatus: {other}"))),
        };
        Ok(Source {
            id: self.id,
            uuid: self.uuid,
            infospace_id: self.infospace_id,
            user_id: self.user_id,
            name: self.name,
            kind: self.kind,
            details: self.details.0,
            source_metadata: self.source_metadata.0,
            status,
            error_message: self.error_message,
            imported_from_uuid: self.imported_from_uuid,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BundleRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    name: String,
    purpose: Option<String>,
    asset_count: i64,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BundleRow> for Bundle {
    fn from(row: BundleRow) -> Self {
        Bundle {
            id: row.id,
            uuid: row.uuid,
            infospace_id: row.infospace_id,
            user_id: row.user_id,
            name: row.name,
            purpose: row.purpose,
            asset_count: row.asset_count,
            imported_from_uuid: row.imported_from_uuid,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SchemaRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    name: String,
    version: String,
    description: Option<String>,
    output_contract: Json<serde_json::Value>,
    instructions: Option<String>,
    field_specific_justification_configs: Json<Metadata>,
    target_level: String,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl SchemaRow {
    fn into_schema(self) -> Result<AnnotationSchema> {
        let target_level = match self.target_level.as_str() {
            "asset" => SchemaTargetLevel::Asset,
            "child" => SchemaTargetLevel::Child,
            other => {
                return Err(SkeinError::Database(format!(
                    "unknown SchemaTargetLevel: {other}"
                )))
            }
        };
        Ok(AnnotationSchema {
            id: self.id,
            uuid: self.uuid,
            infospace_id: self.infospace_id,
            user_id: self.user_id,
            name: self.name,
            version: self.version,
            description: self.description,
            output_contract: self.output_contract.0,
            instructions: self.instructions,
            field_specific_justification_configs: self.field_specific_justification_configs.0,
            target_level,
            imported_from_uuid: self.imported_from_uuid,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    name: String,
    status: String,
    configuration: Json<Metadata>,
    target_schema_ids: Vec<i64>,
    target_asset_ids: Vec<i64>,
    include_parent_context: bool,
    context_window: Option<i32>,
    error_message: Option<String>,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl RunRow {
    fn into_run(self) -> Result<AnnotationRun> {
        Ok(AnnotationRun {
            id: self.id,
            uuid: self.uuid,
            infospace_id: self.infospace_id,
            user_id: self.user_id,
            name: self.name,
            status: parse_status::<RunStatus>(&self.status)?,
            configuration: self.configuration.0,
            target_schema_ids: self.target_schema_ids,
            target_asset_ids: self.target_asset_ids,
            include_parent_context: self.include_parent_context,
            context_window: self.context_window,
            error_message: self.error_message,
            imported_from_uuid: self.imported_from_uuid,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    asset_id: i64,
    schema_id: i64,
    run_id: Option<i64>,
    value: Json<serde_json::Value>,
    status: String,
    error_message: Option<String>,
    region: Option<Json<serde_json::Value>>,
    links: Option<Json<serde_json::Value>>,
    event_timestamp: Option<DateTime<Utc>>,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl AnnotationRow {
    fn into_annotation(self) -> Result<Annotation> {
        let status = match self.status.as_str() {
            "success" => AnnotationStatus::Success,
            "failed" => AnnotationStatus::Failed,
            other => {
                return Err(SkeinError::Database(format!(
                    "unknown AnnotationStatus: {other}"
                )))
            }
        };
        Ok(Annotation {
            id: self.id,
            uuid: self.uuid,
            infospace_id: self.infospace_id,
            user_id: self.user_id,
            asset_id: self.asset_id,
            schema_id: self.schema_id,
            run_id: self.run_id,
            value: self.value.0,
            status,
            error_message: self.error_message,
            region: self.region.map(|j| j.0),
            links: self.links.map(|j| j.0),
            event_timestamp: self.event_timestamp,
            imported_from_uuid: self.imported_from_uuid,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JustificationRow {
    id: i64,
    annotation_id: i64,
    field_name: Option<String>,
    reasoning: String,
    evidence_payload: Json<Metadata>,
    score: Option<f64>,
    model_name: Option<String>,
}

impl From<JustificationRow> for Justification {
    fn from(row: JustificationRow) -> Self {
        Justification {
            id: row.id,
            annotation_id: row.annotation_id,
            field_name: row.field_name,
            reasoning: row.reasoning,
            evidence_payload: row.evidence_payload.0,
            score: row.score,
            model_name: row.model_name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DatasetRow {
    id: i64,
    uuid: Uuid,
    infospace_id: i64,
    user_id: i64,
    name: String,
    description: Option<String>,
    asset_ids: Vec<i64>,
    schema_ids: Vec<i64>,
    run_ids: Vec<i64>,
    imported_from_uuid: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DatasetRow> for Dataset {
    fn from(row: DatasetRow) -> Self {
        Dataset {
            id: row.id,
            uuid: row.uuid,
            infospace_id: row.infospace_id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            asset_ids: row.asset_ids,
            schema_ids: row.schema_ids,
            run_ids: row.run_ids,
            imported_from_uuid: row.imported_from_uuid,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn check_infospace_access(&self, infospace_id: i64, user_id: i64) -> Result<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM infospace_members WHERE infospace_id = $1 AND user_id = $2",
        )
        .bind(infospace_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists.is_some())
    }

    async fn create_asset(&self, create: AssetCreate) -> Result<Asset> {
        let row = sqlx::query_as::<_, AssetRow>(
            r#"
            INSERT INTO assets
                (infospace_id, user_id, title, kind, parent_asset_id, source_id,
                 part_index, blob_path, text_content, source_identifier,
                 source_metadata, event_timestamp, content_hash, imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.title)
        .bind(create.kind().to_string())
        .bind(create.parent_asset_id)
        .bind(create.source_id)
        .bind(create.part_index)
        .bind(&create.blob_path)
        .bind(&create.text_content)
        .bind(&create.source_identifier)
        .bind(Json(&create.source_metadata))
        .bind(create.event_timestamp)
        .bind(&create.content_hash)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_asset()
    }

    async fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(AssetRow::into_asset).transpose()
    }

    async fn update_asset(&self, asset: &Asset) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE assets SET
                title = $2, kind = $3, parent_asset_id = $4, source_id = $5,
                part_index = $6, blob_path = $7, text_content = $8,
                source_identifier = $9, source_metadata = $10,
                event_timestamp = $11, content_hash = $12,
                processing_status = $13, processing_error = $14
            WHERE id = $1
            "#,
        )
        .bind(asset.id)
        .bind(&asset.title)
        .bind(asset.kind.to_string())
        .bind(asset.parent_asset_id)
        .bind(asset.source_id)
        .bind(asset.part_index)
        .bind(&asset.blob_path)
        .bind(&asset.text_content)
        .bind(&asset.source_identifier)
        .bind(Json(&asset.source_metadata))
        .bind(asset.event_timestamp)
        .bind(&asset.content_hash)
        .bind(asset.processing_status.to_string())
        .bind(&asset.processing_error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(SkeinError::NotFound(format!("asset {}", asset.id)));
        }
        Ok(())
    }

    async fn delete_asset(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_children(&self, parent_asset_id: i64) -> Result<Vec<Asset>> {
        let rows = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT * FROM assets
            WHERE parent_asset_id = $1
            ORDER BY part_index NULLS LAST, created_at, id
            "#,
        )
        .bind(parent_asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    async fn delete_children(&self, parent_asset_id: i64) -> Result<u64> {
        // ON DELETE CASCADE takes grandchildren along.
        let result = sqlx::query("DELETE FROM assets WHERE parent_asset_id = $1")
            .bind(parent_asset_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn list_assets_by_source(&self, source_id: i64) -> Result<Vec<Asset>> {
        let rows = sqlx::query_as::<_, AssetRow>(
            "SELECT * FROM assets WHERE source_id = $1 ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    async fn create_source(&self, create: SourceCreate) -> Result<Source> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            INSERT INTO sources
                (infospace_id, user_id, name, kind, details, source_metadata, imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.name)
        .bind(&create.kind)
        .bind(Json(&create.details))
        .bind(Json(&create.source_metadata))
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_source()
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(SourceRow::into_source).transpose()
    }

    async fn update_source_status(
        &self,
        id: i64,
        status: SourceStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let status_str = match status {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Complete => "complete",
            SourceStatus::Failed => "failed",
        };
        sqlx::query("UPDATE sources SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status_str)
            .bind(&error_message)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_bundle(&self, create: BundleCreate) -> Result<Bundle> {
        let row = sqlx::query_as::<_, BundleRow>(
            r#"
            INSERT INTO bundles (infospace_id, user_id, name, purpose, imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.name)
        .bind(&create.purpose)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>> {
        let row = sqlx::query_as::<_, BundleRow>("SELECT * FROM bundles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Bundle::from))
    }

    async fn link_asset_to_bundle(&self, bundle_id: i64, asset_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bundle_assets (bundle_id, asset_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(bundle_id)
        .bind(asset_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            sqlx::query("UPDATE bundles SET asset_count = asset_count + 1 WHERE id = $1")
                .bind(bundle_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(inserted)
    }

    async fn bundle_asset_ids(&self, bundle_id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar("SELECT asset_id FROM bundle_assets WHERE bundle_id = $1 ORDER BY asset_id")
            .bind(bundle_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_schema(&self, create: SchemaCreate) -> Result<AnnotationSchema> {
        let target_level = match create.target_level {
            SchemaTargetLevel::Asset => "asset",
            SchemaTargetLevel::Child => "child",
        };
        let row = sqlx::query_as::<_, SchemaRow>(
            r#"
            INSERT INTO annotation_schemas
                (infospace_id, user_id, name, version, description, output_contract,
                 instructions, field_specific_justification_configs, target_level,
                 imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.name)
        .bind(&create.version)
        .bind(&create.description)
        .bind(Json(&create.output_contract))
        .bind(&create.instructions)
        .bind(Json(&create.field_specific_justification_configs))
        .bind(target_level)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_schema()
    }

    async fn get_schema(&self, id: i64) -> Result<Option<AnnotationSchema>> {
        let row =
            sqlx::query_as::<_, SchemaRow>("SELECT * FROM annotation_schemas WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(SchemaRow::into_schema).transpose()
    }

    async fn schema_version_exists(&self, uuid: &str, version: &str) -> Result<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM annotation_schemas WHERE uuid::text = $1 AND version = $2",
        )
        .bind(uuid)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists.is_some())
    }

    async fn create_run(&self, create: RunCreate) -> Result<AnnotationRun> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO annotation_runs
                (infospace_id, user_id, name, configuration, target_schema_ids,
                 target_asset_ids, include_parent_context, context_window,
                 imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.name)
        .bind(Json(&create.configuration))
        .bind(&create.target_schema_ids)
        .bind(&create.target_asset_ids)
        .bind(create.include_parent_context)
        .bind(create.context_window)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_run()
    }

    async fn get_run(&self, id: i64) -> Result<Option<AnnotationRun>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM annotation_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(RunRow::into_run).transpose()
    }

    async fn update_run_status(
        &self,
        id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE annotation_runs SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .bind(&error_message)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_run(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM annotation_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_annotation(&self, create: AnnotationCreate) -> Result<Annotation> {
        let status = match create.status {
            AnnotationStatus::Success => "success",
            AnnotationStatus::Failed => "failed",
        };
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            INSERT INTO annotations
                (infospace_id, user_id, asset_id, schema_id, run_id, value, status,
                 error_message, region, links, event_timestamp, imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(create.asset_id)
        .bind(create.schema_id)
        .bind(create.run_id)
        .bind(Json(&create.value))
        .bind(status)
        .bind(&create.error_message)
        .bind(create.region.as_ref().map(Json))
        .bind(create.links.as_ref().map(Json))
        .bind(create.event_timestamp)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(dbe) if dbe.is_unique_violation() => SkeinError::Validation(
                format!(
                    "annotation already exists for asset {} schema {} run {:?}",
                    create.asset_id, create.schema_id, create.run_id
                ),
            ),
            _ => db_err(e),
        })?;
        row.into_annotation()
    }

    async fn list_annotations_for_asset(&self, asset_id: i64) -> Result<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            "SELECT * FROM annotations WHERE asset_id = $1 ORDER BY id",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AnnotationRow::into_annotation).collect()
    }

    async fn list_annotations_for_run(&self, run_id: i64) -> Result<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            "SELECT * FROM annotations WHERE run_id = $1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AnnotationRow::into_annotation).collect()
    }

    async fn create_justification(&self, create: JustificationCreate) -> Result<Justification> {
        let row = sqlx::query_as::<_, JustificationRow>(
            r#"
            INSERT INTO justifications
                (annotation_id, field_name, reasoning, evidence_payload, score, model_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(create.annotation_id)
        .bind(&create.field_name)
        .bind(&create.reasoning)
        .bind(Json(&create.evidence_payload))
        .bind(create.score)
        .bind(&create.model_name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn list_justifications(&self, annotation_id: i64) -> Result<Vec<Justification>> {
        let rows = sqlx::query_as::<_, JustificationRow>(
            "SELECT * FROM justifications WHERE annotation_id = $1 ORDER BY id",
        )
        .bind(annotation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Justification::from).collect())
    }

    async fn create_dataset(&self, create: DatasetCreate) -> Result<Dataset> {
        let row = sqlx::query_as::<_, DatasetRow>(
            r#"
            INSERT INTO datasets
                (infospace_id, user_id, name, description, asset_ids, schema_ids,
                 run_ids, imported_from_uuid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(create.infospace_id)
        .bind(create.user_id)
        .bind(&create.name)
        .bind(&create.description)
        .bind(&create.asset_ids)
        .bind(&create.schema_ids)
        .bind(&create.run_ids)
        .bind(&create.imported_from_uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn get_dataset(&self, id: i64) -> Result<Option<Dataset>> {
        let row = sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Dataset::from))
    }
}
