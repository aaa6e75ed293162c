use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open string-keyed metadata map carried by assets, sources and runs.
/// Values pass through untouched unless a schema exists to validate them.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// --- Asset Kinds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Pdf,
    Csv,
    CsvRow,
    PdfPage,
    Web,
    Image,
    Text,
    Article,
    Mbox,
    Email,
    Video,
    Audio,
    File,
}

impl AssetKind {
    /// Kinds that have a content processor and need processing after
    /// ingestion or import.
    pub fn needs_processing(self) -> bool {
        matches!(
            self,
            AssetKind::Csv | AssetKind::Pdf | AssetKind::Web | AssetKind::Mbox
        )
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetKind::Pdf => "pdf",
            AssetKind::Csv => "csv",
            AssetKind::CsvRow => "csv_row",
            AssetKind::PdfPage => "pdf_page",
            AssetKind::Web => "web",
            AssetKind::Image => "image",
            AssetKind::Text => "text",
            AssetKind::Article => "article",
            AssetKind::Mbox => "mbox",
            AssetKind::Email => "email",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
            AssetKind::File => "file",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AssetKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "csv_row" => Ok(Self::CsvRow),
            "pdf_page" => Ok(Self::PdfPage),
            "web" => Ok(Self::Web),
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "article" => Ok(Self::Article),
            "mbox" => Ok(Self::Mbox),
            "email" => Ok(Self::Email),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            other => Err(format!("unknown AssetKind: {other}")),
        }
    }
}

// --- Statuses ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Ready => write!(f, "ready"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ProcessingStatus: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

/// Lifecycle of an annotation run. Transitions form a DAG with a
/// pause/resume cycle; everything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Paused,
}

impl RunStatus {
    /// Allowed transitions:
    /// PENDING -> RUNNING; RUNNING -> COMPLETED | COMPLETED_WITH_ERRORS |
    /// FAILED | PAUSED; PAUSED -> RUNNING; FAILED -> PENDING (retry).
    pub fn can_transition(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, CompletedWithErrors)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::CompletedWithErrors)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown RunStatus: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaTargetLevel {
    Asset,
    Child,
}

// --- Entities ---

/// A stored unit of ingestable content: a file, a row, a page, an article,
/// an image. Children reference their parent and carry a stable
/// `part_index` matching source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub title: String,
    pub kind: AssetKind,
    pub parent_asset_id: Option<i64>,
    pub source_id: Option<i64>,
    pub part_index: Option<i32>,
    pub blob_path: Option<String>,
    pub text_content: Option<String>,
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub source_metadata: Metadata,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a new asset.
#[derive(Debug, Clone, Default)]
pub struct AssetCreate {
    pub title: String,
    pub kind: Option<AssetKind>,
    pub infospace_id: i64,
    pub user_id: i64,
    pub parent_asset_id: Option<i64>,
    pub source_id: Option<i64>,
    pub part_index: Option<i32>,
    pub blob_path: Option<String>,
    pub text_content: Option<String>,
    pub source_identifier: Option<String>,
    pub source_metadata: Metadata,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub imported_from_uuid: Option<String>,
}

impl AssetCreate {
    pub fn new(infospace_id: i64, user_id: i64, title: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            title: title.into(),
            kind: Some(kind),
            infospace_id,
            user_id,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind.unwrap_or(AssetKind::File)
    }
}

/// Logical origin of one or more assets, e.g. one uploaded file or one
/// feed subscription. Assets may also exist without a source (adhoc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub details: Metadata,
    #[serde(default)]
    pub source_metadata: Metadata,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Named, user-curated set of assets (weak many-to-many references).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub purpose: Option<String>,
    /// Denormalized; must equal the number of distinct bundle-asset links.
    pub asset_count: i64,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A versioned JSON-schema contract. Immutable per (uuid, version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationSchema {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub output_contract: serde_json::Value,
    pub instructions: Option<String>,
    #[serde(default)]
    pub field_specific_justification_configs: Metadata,
    pub target_level: SchemaTargetLevel,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One execution grouping of schemas against a set of assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRun {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub configuration: Metadata,
    pub target_schema_ids: Vec<i64>,
    pub target_asset_ids: Vec<i64>,
    pub include_parent_context: bool,
    pub context_window: Option<i32>,
    pub error_message: Option<String>,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One structured result for (asset, schema, run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub asset_id: i64,
    pub schema_id: i64,
    pub run_id: Option<i64>,
    pub value: serde_json::Value,
    pub status: AnnotationStatus,
    pub error_message: Option<String>,
    pub region: Option<serde_json::Value>,
    pub links: Option<serde_json::Value>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-field reasoning trace attached to an annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Justification {
    pub id: i64,
    pub annotation_id: i64,
    pub field_name: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub evidence_payload: Metadata,
    pub score: Option<f64>,
    pub model_name: Option<String>,
}

/// Named set of assets plus the schemas and runs that produced their
/// annotations; the unit of the DATASET package type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub uuid: Uuid,
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub asset_ids: Vec<i64>,
    pub schema_ids: Vec<i64>,
    pub run_ids: Vec<i64>,
    pub imported_from_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Insert parameter structs ---

#[derive(Debug, Clone, Default)]
pub struct SourceCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub kind: String,
    pub details: Metadata,
    pub source_metadata: Metadata,
    pub imported_from_uuid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BundleCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub purpose: Option<String>,
    pub imported_from_uuid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SchemaCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub output_contract: serde_json::Value,
    pub instructions: Option<String>,
    pub field_specific_justification_configs: Metadata,
    pub target_level: SchemaTargetLevel,
    pub imported_from_uuid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub configuration: Metadata,
    pub target_schema_ids: Vec<i64>,
    pub target_asset_ids: Vec<i64>,
    pub include_parent_context: bool,
    pub context_window: Option<i32>,
    pub imported_from_uuid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnnotationCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub asset_id: i64,
    pub schema_id: i64,
    pub run_id: Option<i64>,
    pub value: serde_json::Value,
    pub status: AnnotationStatus,
    pub error_message: Option<String>,
    pub region: Option<serde_json::Value>,
    pub links: Option<serde_json::Value>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub imported_from_uuid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JustificationCreate {
    pub annotation_id: i64,
    pub field_name: Option<String>,
    pub reasoning: String,
    pub evidence_payload: Metadata,
    pub score: Option<f64>,
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetCreate {
    pub infospace_id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub asset_ids: Vec<i64>,
    pub schema_ids: Vec<i64>,
    pub run_ids: Vec<i64>,
    pub imported_from_uuid: Option<String>,
}

/// Outcome of a bulk operation: per-item failures are accumulated, the
/// surrounding transaction commits whatever succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResult {
    pub succeeded: Vec<i64>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    pub item: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_transitions() {
        use RunStatus::*;
        assert!(Pending.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(CompletedWithErrors));
        assert!(Running.can_transition(Failed));
        assert!(Running.can_transition(Paused));
        assert!(Paused.can_transition(Running));
        assert!(Failed.can_transition(Pending));

        assert!(!Pending.can_transition(Completed));
        assert!(!Completed.can_transition(Running));
        assert!(!CompletedWithErrors.can_transition(Pending));
        assert!(!Paused.can_transition(Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::CompletedWithErrors.is_terminal());
        assert!(!RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_asset_kind_round_trip() {
        for kind in [
            AssetKind::Pdf,
            AssetKind::CsvRow,
            AssetKind::PdfPage,
            AssetKind::Mbox,
        ] {
            assert_eq!(kind.to_string().parse::<AssetKind>().unwrap(), kind);
        }
    }
}
