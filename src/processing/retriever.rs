//! Ingestion into, and similarity search over, the session's active collection.

use crate::embedding::EmbeddingClient;
use crate::extraction::{Extractor, extract_fragments, locate_documents};
use crate::processing::summarize::Summarizer;
use crate::processing::types::{IngestError, IngestReport, RetrieveError};
use crate::session::{ActiveCollection, CollectionManifest, Session};
use crate::store::{
    DocumentStore, IndexBackend, IndexOptions, ReconcileReport, RetrievedRecord, StoreError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a retriever keeps its collection.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    /// Collection name.
    pub collection: String,
    /// Persistence directory, removed wholesale by [`Retriever::clear`].
    pub persist_dir: PathBuf,
    /// Directory extraction writes figures into.
    pub image_dir: PathBuf,
}

/// Runs extraction, summarization and the dual-store write, and serves top-k searches.
pub struct Retriever {
    extractor: Arc<dyn Extractor>,
    summarizer: Summarizer,
    embedder: Arc<dyn EmbeddingClient>,
    backend: IndexBackend,
    options: RetrieverOptions,
}

impl Retriever {
    /// Assemble a retriever. `embedder` is shared by every store it opens.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        summarizer: Summarizer,
        embedder: Arc<dyn EmbeddingClient>,
        backend: IndexBackend,
        options: RetrieverOptions,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            embedder,
            backend,
            options,
        }
    }

    /// Summarizer used for ingestion, shared with query-time attachments.
    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.options.collection
    }

    fn index_options(&self, create_if_missing: bool) -> IndexOptions {
        IndexOptions {
            collection: self.options.collection.clone(),
            persist_dir: self.options.persist_dir.clone(),
            dimension: self.embedder.dimension(),
            create_if_missing,
        }
    }

    /// Replace the session's collection with one built from `path`.
    ///
    /// The previous collection is cleared first. On any error the session is left without an
    /// active collection and nothing from this document stays on disk.
    pub async fn ingest(
        &self,
        session: &mut Session,
        path: &Path,
    ) -> Result<IngestReport, IngestError> {
        self.clear(session).await?;

        let documents = locate_documents(path);
        if documents.is_empty() {
            return Err(IngestError::UnsupportedDocument(path.to_path_buf()));
        }

        let fragments =
            extract_fragments(self.extractor.as_ref(), &documents, &self.options.image_dir)
                .await?;
        if fragments.is_empty() {
            tracing::warn!(path = %path.display(), "No fragments extracted");
            return Err(IngestError::NoFragments(path.to_path_buf()));
        }
        let extracted = fragments.len();

        let batch = self.summarizer.summarize_all(fragments).await?;
        if batch.summarized.is_empty() {
            return Err(IngestError::NothingIndexed {
                failures: batch.failures,
            });
        }

        let store = DocumentStore::open(
            &self.backend,
            &self.index_options(true),
            self.embedder.clone(),
        )
        .await?;
        let manifest = CollectionManifest::new(
            &self.options.collection,
            path,
            batch.counts,
            batch.failures,
        );

        let written = match store.write(batch.summarized).await {
            Ok(ids) => manifest.save(&self.options.persist_dir).await.map(|()| ids),
            Err(error) => Err(error),
        };
        let ids = match written {
            Ok(ids) => ids,
            Err(error) => {
                if let Err(cleanup) = store.destroy().await {
                    tracing::warn!(error = %cleanup, "Failed to remove partial collection");
                }
                return Err(error.into());
            }
        };

        let report = IngestReport {
            collection: self.options.collection.clone(),
            source: path.to_path_buf(),
            extracted,
            indexed: ids.len(),
            counts: batch.counts,
            failures: batch.failures,
        };
        tracing::info!(
            collection = %report.collection,
            indexed = report.indexed,
            failures = report.failures,
            "Ingestion complete"
        );

        session.replace(ActiveCollection { store, manifest });
        Ok(report)
    }

    /// Up to `k` original-content records for `query`, best first.
    pub async fn retrieve(
        &self,
        session: &Session,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedRecord>, RetrieveError> {
        let active = session
            .active()
            .ok_or(RetrieveError::NoActiveCollection)?;
        Ok(active.store.search(query, k).await?)
    }

    /// Remove every trace of the collection: the active store, the backend collection and the
    /// persistence directory. Safe to call repeatedly.
    pub async fn clear(&self, session: &mut Session) -> Result<(), StoreError> {
        if let Some(active) = session.clear() {
            active.store.destroy().await?;
        }

        match self.backend.open(&self.index_options(false)).await {
            Ok(index) => index.destroy().await?,
            Err(StoreError::MissingCollection(_)) => {}
            // Local files go with the persistence directory below, readable or not.
            Err(error) if matches!(self.backend, IndexBackend::Local) => {
                tracing::debug!(error = %error, "Skipping local index open during clear");
            }
            Err(error) => return Err(error),
        }

        match tokio::fs::remove_dir_all(&self.options.persist_dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(StoreError::io(&self.options.persist_dir, error)),
        }
        tracing::info!(collection = %self.options.collection, "Cleared collection");
        Ok(())
    }

    /// Reactivate a collection persisted by an earlier process, repairing any divergence
    /// between its journal and its vectors. Returns `None` when nothing was persisted.
    pub async fn restore(
        &self,
        session: &mut Session,
    ) -> Result<Option<ReconcileReport>, StoreError> {
        let Some(manifest) =
            CollectionManifest::load(&self.options.persist_dir, &self.options.collection).await?
        else {
            return Ok(None);
        };

        let store = match DocumentStore::open(
            &self.backend,
            &self.index_options(false),
            self.embedder.clone(),
        )
        .await
        {
            Ok(store) => store,
            Err(StoreError::MissingCollection(name)) => {
                tracing::warn!(collection = %name, "Manifest found but index is gone");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let report = store.reconcile().await?;
        session.replace(ActiveCollection { store, manifest });
        Ok(Some(report))
    }
}
