//! File-backed vector index with brute-force cosine search.

use super::{IndexOptions, ScoredId, StoreError, VectorIndex, VectorRecord, rank};
use crate::fragment::FragmentKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const INDEX_FILE: &str = "vectors.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    id: String,
    kind: FragmentKind,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    #[serde(default)]
    vectors: Vec<StoredVector>,
}

/// Vector index persisted as `<persist_dir>/<collection>/vectors.json`.
pub struct LocalVectorIndex {
    dir: PathBuf,
    dimension: usize,
    vectors: RwLock<Vec<StoredVector>>,
}

impl LocalVectorIndex {
    /// Load the collection from disk, creating it when allowed.
    pub async fn open(options: &IndexOptions) -> Result<Self, StoreError> {
        let dir = options.persist_dir.join(&options.collection);
        let file = dir.join(INDEX_FILE);

        let vectors = match tokio::fs::read(&file).await {
            Ok(bytes) => {
                let stored: IndexFile = serde_json::from_slice(&bytes)
                    .map_err(|source| StoreError::Serde {
                        path: file.clone(),
                        source,
                    })?;
                if stored.dimension != options.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: options.dimension,
                        actual: stored.dimension,
                    });
                }
                stored.vectors
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                if !options.create_if_missing {
                    return Err(StoreError::MissingCollection(options.collection.clone()));
                }
                Vec::new()
            }
            Err(error) => return Err(StoreError::io(file, error)),
        };

        tracing::debug!(
            collection = %options.collection,
            vectors = vectors.len(),
            "Opened local vector index"
        );

        let index = Self {
            dir,
            dimension: options.dimension,
            vectors: RwLock::new(vectors),
        };
        index.persist(&index.vectors.read().await).await?;
        Ok(index)
    }

    async fn persist(&self, vectors: &[StoredVector]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|error| StoreError::io(&self.dir, error))?;
        let file = self.dir.join(INDEX_FILE);
        let body = serde_json::to_vec(&IndexFileRef {
            dimension: self.dimension,
            vectors,
        })
        .map_err(|source| StoreError::Serde {
            path: file.clone(),
            source,
        })?;
        write_atomically(&file, &body).await
    }
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    dimension: usize,
    vectors: &'a [StoredVector],
}

/// Write through a sibling temp file and rename over the target.
pub(crate) async fn write_atomically(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|error| StoreError::io(&tmp, error))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|error| StoreError::io(path, error))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.vector.len(),
            });
        }

        let mut vectors = self.vectors.write().await;
        let mut next = vectors.clone();
        next.extend(records.into_iter().map(|record| StoredVector {
            id: record.id,
            kind: record.kind,
            vector: record.vector,
        }));
        self.persist(&next).await?;
        *vectors = next;
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredId>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let vectors = self.vectors.read().await;
        let hits = vectors
            .iter()
            .map(|stored| ScoredId {
                id: stored.id.clone(),
                kind: stored.kind,
                score: cosine_similarity(vector, &stored.vector),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .vectors
            .read()
            .await
            .iter()
            .map(|stored| stored.id.clone())
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut vectors = self.vectors.write().await;
        let next: Vec<StoredVector> = vectors
            .iter()
            .filter(|stored| !ids.contains(&stored.id))
            .cloned()
            .collect();
        self.persist(&next).await?;
        *vectors = next;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), StoreError> {
        let mut vectors = self.vectors.write().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(StoreError::io(&self.dir, error)),
        }
        vectors.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: &Path, create: bool) -> IndexOptions {
        IndexOptions {
            collection: "mm_rag".into(),
            persist_dir: dir.to_path_buf(),
            dimension: 2,
            create_if_missing: create,
        }
    }

    fn record(id: &str, kind: FragmentKind, vector: [f32; 2]) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            kind,
            vector: vector.to_vec(),
        }
    }

    #[tokio::test]
    async fn search_returns_top_k_by_similarity() {
        let dir = tempdir().expect("tempdir");
        let index = LocalVectorIndex::open(&options(dir.path(), true))
            .await
            .expect("open");
        index
            .add(vec![
                record("far", FragmentKind::Image, [0.0, 1.0]),
                record("near", FragmentKind::Text, [1.0, 0.1]),
                record("mid", FragmentKind::Table, [1.0, 1.0]),
            ])
            .await
            .expect("add");

        let hits = index.search(&[1.0, 0.0], 2).await.expect("search");
        let ids: Vec<_> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[1].kind, FragmentKind::Table);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let index = LocalVectorIndex::open(&options(dir.path(), true))
                .await
                .expect("open");
            index
                .add(vec![record("a", FragmentKind::Text, [1.0, 0.0])])
                .await
                .expect("add");
        }

        let reopened = LocalVectorIndex::open(&options(dir.path(), false))
            .await
            .expect("reopen");
        assert_eq!(reopened.ids().await.expect("ids"), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn missing_collection_is_reported_without_create_flag() {
        let dir = tempdir().expect("tempdir");
        let error = LocalVectorIndex::open(&options(dir.path(), false))
            .await
            .err()
            .expect("missing");
        assert!(matches!(error, StoreError::MissingCollection(name) if name == "mm_rag"));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let index = LocalVectorIndex::open(&options(dir.path(), true))
            .await
            .expect("open");
        let error = index
            .add(vec![VectorRecord {
                id: "x".into(),
                kind: FragmentKind::Text,
                vector: vec![1.0, 0.0, 0.0],
            }])
            .await
            .expect_err("dimension");
        assert!(matches!(error, StoreError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(index.ids().await.expect("ids").is_empty());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let index = LocalVectorIndex::open(&options(dir.path(), true))
            .await
            .expect("open");
        index
            .add(vec![record("a", FragmentKind::Text, [1.0, 0.0])])
            .await
            .expect("add");

        index.destroy().await.expect("first destroy");
        index.destroy().await.expect("second destroy");
        assert!(index.ids().await.expect("ids").is_empty());
        assert!(!dir.path().join("mm_rag").exists());
    }

    #[tokio::test]
    async fn delete_removes_only_named_ids() {
        let dir = tempdir().expect("tempdir");
        let index = LocalVectorIndex::open(&options(dir.path(), true))
            .await
            .expect("open");
        index
            .add(vec![
                record("a", FragmentKind::Text, [1.0, 0.0]),
                record("b", FragmentKind::Text, [0.0, 1.0]),
            ])
            .await
            .expect("add");

        index.delete(&["a".to_string()]).await.expect("delete");
        assert_eq!(index.ids().await.expect("ids"), vec!["b".to_string()]);
    }
}
