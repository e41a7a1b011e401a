//! Dual-index storage: summary vectors in a [`VectorIndex`], original payloads in a
//! [`ContentStore`] backed by a journal.
//!
//! [`DocumentStore`] keeps the two facets keyed by the same identifier and is the only type
//! that writes to either of them.

pub mod content;
pub mod dual;
pub mod local;
pub mod qdrant_index;

pub use content::{ContentStore, Journal, StagedEntry};
pub use dual::{DocumentStore, ReconcileReport, RetrievedRecord};
pub use local::LocalVectorIndex;
pub use qdrant_index::QdrantIndex;

use crate::config::{Config, VectorStoreKind};
use crate::embedding::EmbeddingClientError;
use crate::fragment::{FragmentKind, UnsupportedKind};
use crate::qdrant::QdrantError;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted record could not be encoded or decoded.
    #[error("Corrupt record in {path}: {source}")]
    Serde {
        /// File holding the record.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Remote vector store failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Embedding provider failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// A stored kind tag is outside the closed set.
    #[error(transparent)]
    UnsupportedKind(#[from] UnsupportedKind),
    /// The collection does not exist and creation was not requested.
    #[error("Collection '{0}' does not exist")]
    MissingCollection(String),
    /// A vector with the wrong size reached the index.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Offending vector dimension.
        actual: usize,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Summary-embedding facet of an index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Identifier shared with the content record.
    pub id: String,
    /// Kind of the summarized fragment.
    pub kind: FragmentKind,
    /// Embedding of the summary.
    pub vector: Vec<f32>,
}

/// Search hit returned by a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    /// Entry identifier.
    pub id: String,
    /// Kind recorded with the vector.
    pub kind: FragmentKind,
    /// Cosine similarity.
    pub score: f32,
}

/// Interface implemented by vector index backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add a batch of records.
    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), StoreError>;

    /// Return at most `k` hits ordered by descending score, ties by id.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredId>, StoreError>;

    /// Every identifier currently indexed.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;

    /// Remove the given identifiers.
    async fn delete(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Remove every record and the index itself. Idempotent.
    async fn destroy(&self) -> Result<(), StoreError>;
}

/// Parameters needed to open a collection.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Collection name.
    pub collection: String,
    /// Persistence directory.
    pub persist_dir: PathBuf,
    /// Vector size.
    pub dimension: usize,
    /// Create the collection when absent.
    pub create_if_missing: bool,
}

/// Backend selection with its connection details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBackend {
    /// JSON file inside the persistence directory.
    Local,
    /// Remote Qdrant instance.
    Qdrant {
        /// Base URL.
        url: String,
        /// Optional API key.
        api_key: Option<String>,
    },
}

impl IndexBackend {
    /// Backend described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        match (config.vector_store, config.qdrant_url.as_ref()) {
            (VectorStoreKind::Qdrant, Some(url)) => Self::Qdrant {
                url: url.clone(),
                api_key: config.qdrant_api_key.clone(),
            },
            _ => Self::Local,
        }
    }

    /// Open (and optionally create) the collection described by `options`.
    pub async fn open(&self, options: &IndexOptions) -> Result<Box<dyn VectorIndex>, StoreError> {
        match self {
            IndexBackend::Local => Ok(Box::new(LocalVectorIndex::open(options).await?)),
            IndexBackend::Qdrant { url, api_key } => Ok(Box::new(
                QdrantIndex::open(url, api_key.clone(), options).await?,
            )),
        }
    }
}

/// Rank hits by descending score, breaking ties by id, and keep the best `k`.
pub(crate) fn rank(mut hits: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.id.cmp(&right.id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> ScoredId {
        ScoredId {
            id: id.into(),
            kind: FragmentKind::Text,
            score,
        }
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let ranked = rank(
            vec![hit("b", 0.5), hit("c", 0.9), hit("a", 0.5), hit("d", 0.1)],
            3,
        );
        let ids: Vec<_> = ranked.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn backend_defaults_to_local() {
        let config = Config::from_lookup(|_| None).expect("config");
        assert_eq!(IndexBackend::from_config(&config), IndexBackend::Local);
    }
}
