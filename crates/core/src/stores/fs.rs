//! Local-disk backends: raw uploads and the document registry.

use crate::error::StoreError;
use crate::models::{Document, DocumentStatus};
use crate::traits::{DocumentRegistry, ObjectStore};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !well_formed {
            return Err(StoreError::Request(format!("object key '{key}' is not a relative path")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(error) => Err(error.into()),
        }
    }
}

/// Writes through a sibling temp file and renames it into place.
pub(crate) async fn persist_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let payload = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(sibling(path, ".tmp"), payload).await?;
    tokio::fs::rename(sibling(path, ".tmp"), path).await
}

/// Missing file reads as the default value.
pub(crate) async fn load_json<T: DeserializeOwned + Default>(path: &Path) -> std::io::Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(error) => Err(error),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive advisory lock on `<path>.lock`, released when dropped.
///
/// Every handle opens its own descriptor, so two handles in one process
/// exclude each other the same way two processes do.
pub(crate) struct StateLock {
    _file: std::fs::File,
}

impl StateLock {
    pub(crate) async fn acquire(path: &Path) -> std::io::Result<Self> {
        let lock_path = sibling(path, ".lock");
        if let Some(parent) = lock_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(Self { _file: file })
    }
}

/// Locked read-modify-write of a JSON state file.
///
/// The file is re-read under the lock, so changes made through other handles
/// are never overwritten. Nothing is written when `apply` fails or changes nothing.
pub(crate) async fn update_json<T, R, E, F>(path: &Path, apply: F) -> Result<R, E>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq,
    F: FnOnce(&mut T) -> Result<R, E>,
    E: From<std::io::Error>,
{
    let _lock = StateLock::acquire(path).await?;
    let current: T = load_json(path).await?;
    let mut next = current.clone();
    let outcome = apply(&mut next)?;
    if next != current {
        persist_json(path, &next).await?;
    }
    Ok(outcome)
}

/// Registry kept as one JSON file shared by every process that opens it.
#[derive(Debug, Clone)]
pub struct FsRegistry {
    path: PathBuf,
}

type Documents = BTreeMap<String, Document>;

impl FsRegistry {
    /// Fails early when an existing file cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let documents: Documents = load_json(&path).await?;
        debug!(path = %path.display(), documents = documents.len(), "registry opened");
        Ok(Self { path })
    }

    async fn snapshot(&self) -> Result<Documents, StoreError> {
        Ok(load_json(&self.path).await?)
    }
}

#[async_trait]
impl DocumentRegistry for FsRegistry {
    async fn register(&self, document: Document) -> Result<(), StoreError> {
        update_json(&self.path, |documents: &mut Documents| -> Result<(), StoreError> {
            documents.insert(document.document_id.clone(), document);
            Ok(())
        })
        .await
    }

    async fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.snapshot().await?.remove(document_id))
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        update_json(&self.path, |documents: &mut Documents| -> Result<(), StoreError> {
            let document = documents
                .get_mut(document_id)
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
            document.status = status;
            document.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self.snapshot().await?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn objects_round_trip_under_nested_keys() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path());

        store
            .put("books/doc-1.pdf", b"%PDF-1.7".to_vec())
            .await
            .expect("put");
        assert_eq!(store.get("books/doc-1.pdf").await.expect("get"), b"%PDF-1.7");
        assert!(matches!(store.get("books/missing.pdf").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path());

        for key in ["../outside", "/etc/passwd", "a/../../b", "", "a\\b"] {
            assert!(
                matches!(store.put(key, Vec::new()).await, Err(StoreError::Request(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn registry_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state/registry.json");

        let registry = FsRegistry::open(&path).await.expect("open");
        registry
            .register(Document::new("doc-1", "Fluid Power", "Anon"))
            .await
            .expect("register");
        registry
            .set_status("doc-1", DocumentStatus::Queued)
            .await
            .expect("status");
        drop(registry);

        let reopened = FsRegistry::open(&path).await.expect("reopen");
        let document = reopened.get("doc-1").await.expect("get").expect("present");
        assert_eq!(document.status, DocumentStatus::Queued);
        assert_eq!(reopened.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn status_written_by_one_handle_is_seen_by_another() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");

        let ingest = FsRegistry::open(&path).await.expect("open");
        let worker = FsRegistry::open(&path).await.expect("open");
        ingest
            .register(Document::new("doc-1", "Fluid Power", "Anon"))
            .await
            .expect("register");
        worker
            .set_status("doc-1", DocumentStatus::Indexed)
            .await
            .expect("worker sees the registration");
        ingest
            .register(Document::new("doc-2", "Hydraulics", "Anon"))
            .await
            .expect("register");

        let documents = worker.list().await.expect("list");
        assert_eq!(documents.len(), 2);
        assert_eq!(
            ingest.get("doc-1").await.expect("get").map(|doc| doc.status),
            Some(DocumentStatus::Indexed)
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_the_previous_status() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");

        let registry = FsRegistry::open(&path).await.expect("open");
        registry
            .register(Document::new("doc-1", "Fluid Power", "Anon"))
            .await
            .expect("register");

        // the scratch file cannot be created once a directory sits in its place
        std::fs::create_dir(dir.path().join("registry.json.tmp")).expect("block scratch path");
        assert!(registry
            .set_status("doc-1", DocumentStatus::Indexed)
            .await
            .is_err());

        let document = registry.get("doc-1").await.expect("get").expect("present");
        assert_eq!(document.status, DocumentStatus::Unprocessed);
        let reopened = FsRegistry::open(&path).await.expect("reopen");
        assert_eq!(
            reopened.get("doc-1").await.expect("get").map(|doc| doc.status),
            Some(DocumentStatus::Unprocessed)
        );
    }
}
