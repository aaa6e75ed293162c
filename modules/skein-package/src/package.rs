//! Package envelope: metadata, manifest and the ZIP layout.
//!
//! A package ZIP contains exactly `manifest.json` plus blob files under
//! `files/`. Readers tolerate unknown manifest keys, unknown files, and
//! archives wrapped in a single top-level directory.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use skein_common::{Result, SkeinError};

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Asset,
    Source,
    Schema,
    Run,
    Bundle,
    Dataset,
    Mixed,
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageType::Asset => "asset",
            PackageType::Source => "source",
            PackageType::Schema => "schema",
            PackageType::Run => "run",
            PackageType::Bundle => "bundle",
            PackageType::Dataset => "dataset",
            PackageType::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package_uuid: String,
    pub package_type: PackageType,
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_name: Option<String>,
}

impl PackageMetadata {
    pub fn new(package_type: PackageType, source_instance_id: &str) -> Self {
        Self {
            package_uuid: Uuid::new_v4().to_string(),
            package_type,
            format_version: FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
            created_by: None,
            description: None,
            source_instance_id: source_instance_id.to_string(),
            source_entity_uuid: None,
            source_entity_id: None,
            source_entity_name: None,
        }
    }

    pub fn entity(
        mut self,
        uuid: impl Into<String>,
        id: i64,
        name: impl Into<String>,
    ) -> Self {
        self.source_entity_uuid = Some(uuid.into());
        self.source_entity_id = Some(id);
        self.source_entity_name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Manifest shape on disk. Unknown keys survive parsing because the
/// `content` payload is untyped and serde ignores extras on the metadata.
#[derive(Serialize, Deserialize)]
struct Manifest {
    metadata: PackageMetadata,
    content: serde_json::Value,
}

/// A self-contained package: manifest content plus blob files keyed by
/// their in-archive path (`files/<name>`).
#[derive(Debug, Clone)]
pub struct DataPackage {
    pub metadata: PackageMetadata,
    pub content: serde_json::Value,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl DataPackage {
    pub fn new(metadata: PackageMetadata, content: serde_json::Value) -> Self {
        Self {
            metadata,
            content,
            files: BTreeMap::new(),
        }
    }

    /// Serialize to ZIP bytes.
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        let manifest = Manifest {
            metadata: self.metadata.clone(),
            content: self.content.clone(),
        };
        let manifest_str = serde_json::to_string_pretty(&manifest)
            .map_err(|e| SkeinError::Validation(format!("manifest serialization failed: {e}")))?;

        writer
            .start_file("manifest.json", options)
            .and_then(|_| {
                writer
                    .write_all(manifest_str.as_bytes())
                    .map_err(zip::result::ZipError::Io)
            })
            .map_err(|e| SkeinError::Processing(format!("zip write failed: {e}")))?;

        for (path, bytes) in &self.files {
            if !path.starts_with("files/") {
                warn!(path, "skipping file with invalid path for zip");
                continue;
            }
            writer
                .start_file(path.as_str(), options)
                .and_then(|_| writer.write_all(bytes).map_err(zip::result::ZipError::Io))
                .map_err(|e| SkeinError::Processing(format!("zip write failed: {e}")))?;
            debug!(path, bytes = bytes.len(), "added file to package");
        }

        let cursor = writer
            .finish()
            .map_err(|e| SkeinError::Processing(format!("zip finalize failed: {e}")))?;
        Ok(cursor.into_inner())
    }

    /// Parse from ZIP bytes. If the archive has exactly one top-level
    /// directory containing every entry, that directory is stripped
    /// before locating `manifest.json` and `files/`.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| SkeinError::Validation(format!("not a valid package zip: {e}")))?;

        let names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .collect();

        let prefix = single_root_prefix(&names);
        let manifest_path = format!("{prefix}manifest.json");

        let manifest_raw = {
            let mut file = archive.by_name(&manifest_path).map_err(|_| {
                SkeinError::Validation(
                    "no manifest.json in the archive's root or single-folder root".into(),
                )
            })?;
            let mut raw = String::new();
            file.read_to_string(&mut raw)
                .map_err(|e| SkeinError::Validation(format!("manifest read failed: {e}")))?;
            raw
        };
        let manifest: Manifest = serde_json::from_str(&manifest_raw)
            .map_err(|e| SkeinError::Validation(format!("manifest parse failed: {e}")))?;

        let files_prefix = format!("{prefix}files/");
        let mut files = BTreeMap::new();
        for name in &names {
            if name.ends_with('/') || !name.starts_with(&files_prefix) {
                continue;
            }
            let mut file = archive
                .by_name(name)
                .map_err(|e| SkeinError::Validation(format!("zip entry read failed: {e}")))?;
            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .map_err(|e| SkeinError::Validation(format!("zip entry read failed: {e}")))?;
            files.insert(name[prefix.len()..].to_string(), content);
        }

        Ok(Self {
            metadata: manifest.metadata,
            content: manifest.content,
            files,
        })
    }
}

/// `"dir/"` when every entry lives under one top-level directory,
/// otherwise empty.
fn single_root_prefix(names: &[String]) -> String {
    let mut top_level: Option<&str> = None;
    for name in names {
        let Some(root) = name.split('/').next().filter(|r| !r.is_empty()) else {
            continue;
        };
        // A top-level plain file means there is no wrapping directory.
        if !name.contains('/') {
            return String::new();
        }
        match top_level {
            None => top_level = Some(root),
            Some(existing) if existing == root => {}
            Some(_) => return String::new(),
        }
    }
    top_level
        .map(|root| format!("{root}/"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_package() -> DataPackage {
        let metadata = PackageMetadata::new(PackageType::Asset, "instance-a")
            .entity(Uuid::new_v4().to_string(), 7, "report.pdf");
        let mut package = DataPackage::new(
            metadata,
            serde_json::json!({"asset": {"title": "report.pdf"}}),
        );
        package
            .files
            .insert("files/report.pdf".to_string(), b"%PDF-1.4 fake".to_vec());
        package
    }

    #[test]
    fn test_zip_round_trip() {
        let package = sample_package();
        let bytes = package.to_zip_bytes().unwrap();
        let parsed = DataPackage::from_zip_bytes(&bytes).unwrap();

        assert_eq!(parsed.metadata.package_type, PackageType::Asset);
        assert_eq!(parsed.metadata.format_version, FORMAT_VERSION);
        assert_eq!(parsed.metadata.source_instance_id, "instance-a");
        assert_eq!(parsed.content["asset"]["title"], "report.pdf");
        assert_eq!(
            parsed.files.get("files/report.pdf").map(Vec::as_slice),
            Some(b"%PDF-1.4 fake".as_slice())
        );
    }

    #[test]
    fn test_single_root_directory_stripped() {
        // Build a zip where everything lives under "export/".
        let package = sample_package();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let manifest = serde_json::json!({
            "metadata": serde_json::to_value(&package.metadata).unwrap(),
            "content": package.content,
        });
        writer.start_file("export/manifest.json", options).unwrap();
        writer
            .write_all(manifest.to_string().as_bytes())
            .unwrap();
        writer.start_file("export/files/report.pdf", options).unwrap();
        writer.write_all(b"%PDF-1.4 fake").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let parsed = DataPackage::from_zip_bytes(&bytes).unwrap();
        assert_eq!(parsed.metadata.package_type, PackageType::Asset);
        assert!(parsed.files.contains_key("files/report.pdf"));
    }

    #[test]
    fn test_unknown_manifest_keys_tolerated() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let manifest = serde_json::json!({
            "metadata": {
                "package_uuid": Uuid::new_v4().to_string(),
                "package_type": "schema",
                "format_version": "1.0",
                "created_at": Utc::now(),
                "source_instance_id": "other",
                "future_field": {"nested": true},
            },
            "content": {"annotation_schema": {}},
            "extra_top_level": 1,
        });
        writer.start_file("manifest.json", options).unwrap();
        writer.write_all(manifest.to_string().as_bytes()).unwrap();
        // Unknown file outside files/ is ignored.
        writer.start_file("README.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let parsed = DataPackage::from_zip_bytes(&bytes).unwrap();
        assert_eq!(parsed.metadata.package_type, PackageType::Schema);
        assert!(parsed.files.is_empty());
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("files/a.bin", options).unwrap();
        writer.write_all(b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(DataPackage::from_zip_bytes(&bytes).is_err());
    }
}
