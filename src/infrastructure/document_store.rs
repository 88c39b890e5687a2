//! # File Document Store
//!
//! Channel documents held in memory and, when a path is given, persisted as one
//! pretty-printed JSON object (`data/channels.json`). Every write is announced
//! on a broadcast channel that backs [`DocumentStore::watch`].

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::domain::errors::StoreError;
use crate::domain::json::merge_patch;
use crate::domain::traits::{ChangeStream, DocumentStore};
use crate::domain::types::{ChangeKind, StoreEvent};

const FEED_CAPACITY: usize = 256;

pub struct FileDocumentStore {
    documents: RwLock<BTreeMap<String, Value>>,
    path: Option<PathBuf>,
    changes: broadcast::Sender<StoreEvent>,
}

impl FileDocumentStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_documents(BTreeMap::new(), None)
    }

    /// Load `path` if it exists; later writes are saved back to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let documents = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                id: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), documents = documents.len(), "Opened channel document store");
        Ok(Self::with_documents(documents, Some(path)))
    }

    fn with_documents(documents: BTreeMap<String, Value>, path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            documents: RwLock::new(documents),
            path,
            changes,
        }
    }

    /// Delete a document. Returns whether it existed.
    #[cfg(test)]
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        if !documents.contains_key(id) {
            return Ok(false);
        }
        let mut next = documents.clone();
        next.remove(id);
        self.persist(&next).await?;
        *documents = next;
        self.announce(StoreEvent {
            kind: ChangeKind::Removed,
            id: id.to_string(),
            data: None,
        });
        Ok(true)
    }

    async fn persist(&self, documents: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(documents)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn announce(&self, event: StoreEvent) {
        // No receivers just means nobody is watching yet.
        let _ = self.changes.send(event);
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn merge(&self, id: &str, patch: Value) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let existed = documents.contains_key(id);
        let mut document = documents
            .get(id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        merge_patch(&mut document, &patch);

        // Memory only changes once the file write went through.
        let mut next = documents.clone();
        next.insert(id.to_string(), document.clone());
        self.persist(&next).await?;
        *documents = next;

        self.announce(StoreEvent {
            kind: if existed {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            },
            id: id.to_string(),
            data: Some(document),
        });
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let stream = BroadcastStream::new(self.changes.subscribe()).map(|item| {
            item.map_err(|e: BroadcastStreamRecvError| {
                StoreError::Unavailable(format!("change feed interrupted: {e}"))
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_merge_creates_and_patches() {
        let store = FileDocumentStore::in_memory();
        assert!(store.get("foo").await.unwrap().is_none());

        store.merge("foo", json!({ "pitch": 2, "mode": "all" })).await.unwrap();
        store.merge("foo", json!({ "pitch": null, "speed": 1.5 })).await.unwrap();

        assert_eq!(
            store.get("foo").await.unwrap(),
            Some(json!({ "mode": "all", "speed": 1.5 }))
        );
    }

    #[tokio::test]
    async fn test_watch_reports_added_modified_removed() {
        let store = FileDocumentStore::in_memory();
        let mut feed = store.watch().await.unwrap();

        store.merge("foo", json!({ "pitch": 1 })).await.unwrap();
        store.merge("foo", json!({ "pitch": 2 })).await.unwrap();
        assert!(store.remove("foo").await.unwrap());
        assert!(!store.remove("foo").await.unwrap());

        let kinds: Vec<ChangeKind> = vec![
            feed.next().await.unwrap().unwrap().kind,
            feed.next().await.unwrap().unwrap().kind,
            feed.next().await.unwrap().unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed]
        );
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("channels.json");

        let store = FileDocumentStore::open(&path).unwrap();
        store.merge("foo", json!({ "voiceId": "Wise_Woman" })).await.unwrap();
        drop(store);

        let reopened = FileDocumentStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("foo").await.unwrap(),
            Some(json!({ "voiceId": "Wise_Woman" }))
        );
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let store = FileDocumentStore::open(&path).unwrap();
        store.merge("foo", json!({ "pitch": 1 })).await.unwrap();
        let mut feed = store.watch().await.unwrap();

        // A non-empty directory where the file should be makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "x").unwrap();

        assert!(store.merge("foo", json!({ "pitch": 2 })).await.is_err());
        assert!(store.merge("bar", json!({ "pitch": 3 })).await.is_err());
        assert_eq!(store.get("foo").await.unwrap(), Some(json!({ "pitch": 1 })));
        assert!(store.get("bar").await.unwrap().is_none());
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), feed.next())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileDocumentStore::open(&path),
            Err(StoreError::Malformed { .. })
        ));
    }
}
