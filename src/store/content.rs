//! Original-content store and the journal that backs it across restarts.

use super::StoreError;
use crate::fragment::{ContentRecord, FragmentKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const JOURNAL_FILE: &str = "content.jsonl";

/// Journal line: an original-content record plus the summary that was embedded for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEntry {
    /// Entry identifier.
    pub id: String,
    /// Fragment kind.
    pub kind: FragmentKind,
    /// Unsummarized payload.
    pub payload: String,
    /// Summary used for the vector facet; kept so the vector can be rebuilt.
    pub summary: String,
}

impl StagedEntry {
    /// Content facet of the entry.
    pub fn record(&self) -> ContentRecord {
        ContentRecord {
            id: self.id.clone(),
            kind: self.kind,
            payload: self.payload.clone(),
        }
    }
}

/// Append-only JSONL file at `<persist_dir>/<collection>/content.jsonl`.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Journal for `collection` under `persist_dir`. Nothing is touched on disk.
    pub fn new(persist_dir: &Path, collection: &str) -> Self {
        Self {
            path: persist_dir.join(collection).join(JOURNAL_FILE),
        }
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries and flush them to stable storage.
    pub async fn append(&self, entries: &[StagedEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::io(parent, error))?;
        }

        let body = self.encode(entries)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|error| StoreError::io(&self.path, error))?;
        file.write_all(&body)
            .await
            .map_err(|error| StoreError::io(&self.path, error))?;
        file.sync_all()
            .await
            .map_err(|error| StoreError::io(&self.path, error))
    }

    /// Read every entry; a missing journal reads as empty.
    pub async fn load(&self) -> Result<Vec<StagedEntry>, StoreError> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::io(&self.path, error)),
        };

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StoreError::Serde {
                    path: self.path.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Replace the journal contents with exactly `entries`.
    pub async fn rewrite(&self, entries: &[StagedEntry]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::io(parent, error))?;
        }
        let body = self.encode(entries)?;
        super::local::write_atomically(&self.path, &body).await
    }

    /// Delete the journal file. Idempotent.
    pub async fn remove(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::io(&self.path, error)),
        }
    }

    fn encode(&self, entries: &[StagedEntry]) -> Result<Vec<u8>, StoreError> {
        let mut body = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut body, entry).map_err(|source| StoreError::Serde {
                path: self.path.clone(),
                source,
            })?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

/// In-memory key-value map from entry id to staged entry.
#[derive(Debug, Default)]
pub struct ContentStore {
    entries: HashMap<String, StagedEntry>,
}

impl ContentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace entries by id.
    pub fn set(&mut self, entries: impl IntoIterator<Item = StagedEntry>) {
        for entry in entries {
            self.entries.insert(entry.id.clone(), entry);
        }
    }

    /// Content records for `ids`; unknown ids yield `None` in their slot.
    pub fn get(&self, ids: &[String]) -> Vec<Option<ContentRecord>> {
        ids.iter()
            .map(|id| self.entries.get(id).map(StagedEntry::record))
            .collect()
    }

    /// Drop the given ids.
    pub fn remove(&mut self, ids: &[String]) {
        for id in ids {
            self.entries.remove(id);
        }
    }

    /// Stored ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Staged entries in id order.
    pub fn entries(&self) -> Vec<StagedEntry> {
        let mut entries: Vec<StagedEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|left, right| left.id.cmp(&right.id));
        entries
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, kind: FragmentKind) -> StagedEntry {
        StagedEntry {
            id: id.into(),
            kind,
            payload: format!("payload {id}"),
            summary: format!("summary {id}"),
        }
    }

    #[tokio::test]
    async fn journal_appends_and_loads_in_order() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::new(dir.path(), "mm_rag");

        journal
            .append(&[entry("b", FragmentKind::Text)])
            .await
            .expect("append");
        journal
            .append(&[entry("a", FragmentKind::Image)])
            .await
            .expect("append");

        let loaded = journal.load().await.expect("load");
        assert_eq!(loaded, vec![entry("b", FragmentKind::Text), entry("a", FragmentKind::Image)]);
    }

    #[tokio::test]
    async fn missing_journal_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::new(dir.path(), "absent");
        assert!(journal.load().await.expect("load").is_empty());
        journal.remove().await.expect("remove missing");
    }

    #[tokio::test]
    async fn rewrite_replaces_contents() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::new(dir.path(), "mm_rag");
        journal
            .append(&[entry("a", FragmentKind::Text), entry("b", FragmentKind::Table)])
            .await
            .expect("append");

        journal
            .rewrite(&[entry("b", FragmentKind::Table)])
            .await
            .expect("rewrite");
        assert_eq!(
            journal.load().await.expect("load"),
            vec![entry("b", FragmentKind::Table)]
        );
    }

    #[tokio::test]
    async fn unknown_kind_in_journal_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::new(dir.path(), "mm_rag");
        tokio::fs::create_dir_all(dir.path().join("mm_rag"))
            .await
            .expect("mkdir");
        tokio::fs::write(
            journal.path(),
            "{\"id\":\"x\",\"kind\":\"audio\",\"payload\":\"p\",\"summary\":\"s\"}\n",
        )
        .await
        .expect("write");

        let error = journal.load().await.expect_err("bad kind");
        assert!(matches!(error, StoreError::Serde { .. }));
    }

    #[test]
    fn content_store_get_preserves_request_order() {
        let mut store = ContentStore::new();
        store.set(vec![entry("a", FragmentKind::Text), entry("b", FragmentKind::Table)]);

        let records = store.get(&["b".into(), "missing".into(), "a".into()]);
        assert_eq!(records[0].as_ref().map(|r| r.kind), Some(FragmentKind::Table));
        assert!(records[1].is_none());
        assert_eq!(records[2].as_ref().map(|r| r.payload.as_str()), Some("payload a"));

        store.remove(&["a".into()]);
        assert_eq!(store.ids(), vec!["b".to_string()]);
        assert_eq!(store.len(), 1);
    }
}
