//! Blob storage behind a trait so ingestion and packaging never touch the
//! filesystem directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use skein_common::{Result, SkeinError};

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, object_name: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, object_name: &str) -> Result<Vec<u8>>;
    async fn delete(&self, object_name: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn exists(&self, object_name: &str) -> Result<bool>;
}

/// Filesystem-backed storage rooted at a directory. Object names are
/// slash-separated relative paths; parents are created on demand.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, object_name: &str) -> Result<PathBuf> {
        // Reject traversal; object names are internal, not user input, but
        // imported package manifests pass through here.
        if object_name.split('/').any(|seg| seg == "..") {
            return Err(SkeinError::Storage(format!(
                "invalid object name: {object_name}"
            )));
        }
        Ok(self.root.join(object_name))
    }
}

#[async_trait]
impl BlobStorage for FsStorage {
    async fn upload(&self, object_name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(object_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SkeinError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SkeinError::Storage(e.to_string()))?;
        debug!(object_name, bytes = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, object_name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(object_name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| SkeinError::Storage(format!("read {object_name}: {e}")))
    }

    async fn delete(&self, object_name: &str) -> Result<()> {
        let path = self.resolve(object_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SkeinError::Storage(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SkeinError::Storage(e.to_string())),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SkeinError::Storage(e.to_string()))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(name) = relative_name(&self.root, &path) {
                    if name.starts_with(prefix) {
                        results.push(name);
                    }
                }
            }
        }
        results.sort();
        Ok(results)
    }

    async fn exists(&self, object_name: &str) -> Result<bool> {
        let path = self.resolve(object_name)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SkeinError::Storage(e.to_string()))?)
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn upload(&self, object_name: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .expect("memory storage poisoned")
            .insert(object_name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, object_name: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("memory storage poisoned")
            .get(object_name)
            .cloned()
            .ok_or_else(|| SkeinError::Storage(format!("no such object: {object_name}")))
    }

    async fn delete(&self, object_name: &str) -> Result<()> {
        self.objects
            .lock()
            .expect("memory storage poisoned")
            .remove(object_name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .lock()
            .expect("memory storage poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, object_name: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .expect("memory storage poisoned")
            .contains_key(object_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.upload("user_1/a/b.csv", b"x,y\n1,2\n").await.unwrap();
        assert!(storage.exists("user_1/a/b.csv").await.unwrap());
        assert_eq!(storage.get("user_1/a/b.csv").await.unwrap(), b"x,y\n1,2\n");

        let listed = storage.list("user_1/").await.unwrap();
        assert_eq!(listed, vec!["user_1/a/b.csv".to_string()]);

        storage.delete("user_1/a/b.csv").await.unwrap();
        assert!(!storage.exists("user_1/a/b.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_storage_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(storage.get("../outside").await.is_err());
    }
}
