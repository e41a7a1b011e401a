//! Caller-owned session holding at most one active collection.

use crate::fragment::KindCounts;
use crate::store::{DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MANIFEST_FILE: &str = "manifest.json";

/// Description of an ingested collection, persisted next to its journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    /// Collection name.
    pub collection: String,
    /// Document the collection was built from.
    pub source: PathBuf,
    /// RFC 3339 ingestion timestamp.
    pub ingested_at: String,
    /// Entries indexed per kind.
    pub counts: KindCounts,
    /// Fragments dropped because summarization failed.
    pub failures: usize,
}

impl CollectionManifest {
    /// Manifest stamped with the current time.
    pub fn new(collection: &str, source: &Path, counts: KindCounts, failures: usize) -> Self {
        let ingested_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            collection: collection.to_string(),
            source: source.to_path_buf(),
            ingested_at,
            counts,
            failures,
        }
    }

    /// Path of the manifest for `collection` under `persist_dir`.
    pub fn path(persist_dir: &Path, collection: &str) -> PathBuf {
        persist_dir.join(collection).join(MANIFEST_FILE)
    }

    /// Write the manifest into the collection directory.
    pub async fn save(&self, persist_dir: &Path) -> Result<(), StoreError> {
        let path = Self::path(persist_dir, &self.collection);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::io(parent, error))?;
        }
        let body = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|error| StoreError::io(&path, error))
    }

    /// Read the manifest for `collection`, if one was written.
    pub async fn load(persist_dir: &Path, collection: &str) -> Result<Option<Self>, StoreError> {
        let path = Self::path(persist_dir, collection);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::io(&path, error)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| StoreError::Serde { path, source })
    }
}

/// Collection currently answering queries.
pub struct ActiveCollection {
    /// Dual store holding the entries.
    pub store: DocumentStore,
    /// Ingestion details.
    pub manifest: CollectionManifest,
}

/// Per-caller state: the active collection, if any.
#[derive(Default)]
pub struct Session {
    active: Option<ActiveCollection>,
}

impl Session {
    /// Session with no active collection.
    pub fn create() -> Self {
        Self::default()
    }

    /// Whether a collection is active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Active collection, if any.
    pub fn active(&self) -> Option<&ActiveCollection> {
        self.active.as_ref()
    }

    /// Manifest of the active collection.
    pub fn manifest(&self) -> Option<&CollectionManifest> {
        self.active.as_ref().map(|active| &active.manifest)
    }

    /// Install `collection`, returning the one it replaces.
    pub fn replace(&mut self, collection: ActiveCollection) -> Option<ActiveCollection> {
        self.active.replace(collection)
    }

    /// Detach and return the active collection.
    pub fn clear(&mut self) -> Option<ActiveCollection> {
        self.active.take()
    }
}
