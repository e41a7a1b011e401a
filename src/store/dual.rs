//! Writes and queries that span both facets of an index entry.

use super::{
    ContentStore, IndexBackend, IndexOptions, Journal, StagedEntry, StoreError, VectorIndex,
    VectorRecord,
};
use crate::embedding::EmbeddingClient;
use crate::fragment::{ContentRecord, SummarizedFragment};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Content record returned by a similarity search, with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedRecord {
    /// Original content.
    pub record: ContentRecord,
    /// Cosine similarity between the query and the entry's summary.
    pub score: f32,
}

/// Outcome of [`DocumentStore::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entries loaded from the journal.
    pub restored: usize,
    /// Journal entries whose vectors were rebuilt.
    pub reindexed: usize,
    /// Vectors deleted because they had no content record.
    pub pruned: usize,
}

/// Dual store for one collection: summary vectors plus original content, keyed by the same id.
pub struct DocumentStore {
    collection: String,
    dir: PathBuf,
    index: Box<dyn VectorIndex>,
    content: RwLock<ContentStore>,
    journal: Journal,
    embedder: Arc<dyn EmbeddingClient>,
}

impl DocumentStore {
    /// Open the collection on `backend`. The embedder is used for both writes and queries.
    pub async fn open(
        backend: &IndexBackend,
        options: &IndexOptions,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, StoreError> {
        if embedder.dimension() != options.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: options.dimension,
                actual: embedder.dimension(),
            });
        }

        let index = backend.open(options).await?;
        Ok(Self {
            collection: options.collection.clone(),
            dir: options.persist_dir.join(&options.collection),
            index,
            content: RwLock::new(ContentStore::new()),
            journal: Journal::new(&options.persist_dir, &options.collection),
            embedder,
        })
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Directory holding the collection's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Assign ids and write each fragment to both facets.
    ///
    /// Content is journaled before any vector is written. If embedding or indexing fails, the
    /// staged ids are withdrawn from the content store and the journal so neither facet keeps
    /// entries the other lacks.
    pub async fn write(&self, fragments: Vec<SummarizedFragment>) -> Result<Vec<String>, StoreError> {
        if fragments.is_empty() {
            return Ok(Vec::new());
        }

        let staged: Vec<StagedEntry> = fragments
            .into_iter()
            .map(|item| StagedEntry {
                id: Uuid::new_v4().to_string(),
                kind: item.fragment.kind(),
                payload: item.fragment.payload(),
                summary: item.summary,
            })
            .collect();
        let ids: Vec<String> = staged.iter().map(|entry| entry.id.clone()).collect();

        self.journal.append(&staged).await?;
        self.content.write().await.set(staged.iter().cloned());

        if let Err(error) = self.index_entries(&staged).await {
            tracing::warn!(
                collection = %self.collection,
                entries = ids.len(),
                error = %error,
                "Vector write failed; withdrawing staged content"
            );
            if let Err(rollback) = self.withdraw(&ids).await {
                tracing::error!(
                    collection = %self.collection,
                    error = %rollback,
                    "Could not withdraw staged content; restore will reconcile it"
                );
            }
            return Err(error);
        }

        tracing::info!(
            collection = %self.collection,
            entries = ids.len(),
            "Stored summarized fragments"
        );
        Ok(ids)
    }

    async fn index_entries(&self, entries: &[StagedEntry]) -> Result<(), StoreError> {
        let summaries = entries.iter().map(|entry| entry.summary.clone()).collect();
        let vectors = self.embedder.generate_embeddings(summaries).await?;
        let records = entries
            .iter()
            .zip(vectors)
            .map(|(entry, vector)| VectorRecord {
                id: entry.id.clone(),
                kind: entry.kind,
                vector,
            })
            .collect();
        self.index.add(records).await
    }

    async fn withdraw(&self, ids: &[String]) -> Result<(), StoreError> {
        let remaining = {
            let mut content = self.content.write().await;
            content.remove(ids);
            content.entries()
        };
        if let Err(error) = self.index.delete(ids).await {
            tracing::warn!(error = %error, "Could not delete partially written vectors");
        }
        self.journal.rewrite(&remaining).await
    }

    /// Embed `query` and return up to `k` content records, best match first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedRecord>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await?;
        let vector = vectors.pop().unwrap_or_default();
        let hits = self.index.search(&vector, k).await?;

        let ids: Vec<String> = hits.iter().map(|hit| hit.id.clone()).collect();
        let records = self.content.read().await.get(&ids);

        let mut results = Vec::with_capacity(hits.len());
        for (hit, record) in hits.into_iter().zip(records) {
            match record {
                Some(record) => results.push(RetrievedRecord {
                    record,
                    score: hit.score,
                }),
                None => tracing::warn!(id = %hit.id, "Vector hit has no content record; skipping"),
            }
        }

        tracing::debug!(k, returned = results.len(), "Similarity search complete");
        Ok(results)
    }

    /// Reload content from the journal and repair divergence between the two facets.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let entries = self.journal.load().await?;
        let restored = entries.len();
        let journal_ids: HashSet<String> = entries.iter().map(|entry| entry.id.clone()).collect();

        {
            let mut content = self.content.write().await;
            content.clear();
            content.set(entries.iter().cloned());
        }

        let indexed: HashSet<String> = self.index.ids().await?.into_iter().collect();

        let missing: Vec<StagedEntry> = entries
            .into_iter()
            .filter(|entry| !indexed.contains(&entry.id))
            .collect();
        if !missing.is_empty() {
            self.index_entries(&missing).await?;
        }

        let mut orphans: Vec<String> = indexed
            .into_iter()
            .filter(|id| !journal_ids.contains(id))
            .collect();
        orphans.sort();
        if !orphans.is_empty() {
            self.index.delete(&orphans).await?;
        }

        let report = ReconcileReport {
            restored,
            reindexed: missing.len(),
            pruned: orphans.len(),
        };
        tracing::info!(
            collection = %self.collection,
            restored = report.restored,
            reindexed = report.reindexed,
            pruned = report.pruned,
            "Reconciled collection"
        );
        Ok(report)
    }

    /// Delete both facets and every file of the collection. Idempotent.
    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.index.destroy().await?;
        self.journal.remove().await?;
        self.content.write().await.clear();
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::io(&self.dir, error)),
        }
    }

    /// Number of content records.
    pub async fn len(&self) -> usize {
        self.content.read().await.len()
    }

    /// Whether the collection holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.content.read().await.is_empty()
    }

    /// Ids present in the content store, sorted.
    pub async fn content_ids(&self) -> Vec<String> {
        self.content.read().await.ids()
    }

    /// Ids present in the vector index, sorted.
    pub async fn vector_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = self.index.ids().await?;
        ids.sort();
        Ok(ids)
    }
}
