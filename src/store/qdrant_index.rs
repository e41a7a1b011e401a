//! [`VectorIndex`] backed by a remote Qdrant collection.

use super::{IndexOptions, ScoredId, StoreError, VectorIndex, VectorRecord, rank};
use crate::fragment::FragmentKind;
use crate::qdrant::{KindedPoint, QdrantService};
use async_trait::async_trait;

/// Summary vectors stored as Qdrant points keyed by entry id.
pub struct QdrantIndex {
    service: QdrantService,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect to Qdrant and make sure the collection is present.
    pub async fn open(
        url: &str,
        api_key: Option<String>,
        options: &IndexOptions,
    ) -> Result<Self, StoreError> {
        let service = QdrantService::new(url, api_key)?;

        if options.create_if_missing {
            service
                .create_collection_if_not_exists(&options.collection, options.dimension as u64)
                .await?;
        } else if !service.collection_exists(&options.collection).await? {
            return Err(StoreError::MissingCollection(options.collection.clone()));
        }

        Ok(Self {
            service,
            collection: options.collection.clone(),
            dimension: options.dimension,
        })
    }
}

fn kind_from_tag(tag: Option<&str>) -> Result<FragmentKind, StoreError> {
    Ok(tag.unwrap_or_default().parse::<FragmentKind>()?)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.vector.len(),
            });
        }

        let points = records
            .into_iter()
            .map(|record| KindedPoint {
                id: record.id,
                vector: record.vector,
                kind: record.kind.to_string(),
            })
            .collect();

        self.service.upsert_points(&self.collection, points).await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredId>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let points = self
            .service
            .search_points(&self.collection, vector, k)
            .await?;

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            hits.push(ScoredId {
                kind: kind_from_tag(point.kind.as_deref())?,
                id: point.id,
                score: point.score,
            });
        }
        Ok(rank(hits, k))
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.service.scroll_point_ids(&self.collection).await?)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        Ok(self.service.delete_points(&self.collection, ids).await?)
    }

    async fn destroy(&self) -> Result<(), StoreError> {
        Ok(self.service.delete_collection(&self.collection).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn options(create: bool) -> IndexOptions {
        IndexOptions {
            collection: "mm_rag".into(),
            persist_dir: PathBuf::from("unused"),
            dimension: 2,
            create_if_missing: create,
        }
    }

    #[tokio::test]
    async fn open_without_create_rejects_missing_collection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/mm_rag");
                then.status(404);
            })
            .await;

        let error = QdrantIndex::open(&server.base_url(), None, &options(false))
            .await
            .err()
            .expect("missing collection");
        assert!(matches!(error, StoreError::MissingCollection(_)));
    }

    #[tokio::test]
    async fn open_creates_collection_with_dimension() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/mm_rag");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/mm_rag")
                    .json_body_partial(r#"{"vectors":{"size":2,"distance":"Cosine"}}"#);
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        QdrantIndex::open(&server.base_url(), None, &options(true))
            .await
            .expect("open");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn search_decodes_kind_tags() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/mm_rag");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/mm_rag/points/query");
                then.status(200).json_body(json!({
                    "result": { "points": [
                        { "id": "b", "score": 0.5, "payload": { "kind": "image" } },
                        { "id": "a", "score": 0.9, "payload": { "kind": "table" } }
                    ]}
                }));
            })
            .await;

        let index = QdrantIndex::open(&server.base_url(), None, &options(false))
            .await
            .expect("open");
        let hits = index.search(&[1.0, 0.0], 2).await.expect("search");
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].kind, FragmentKind::Table);
        assert_eq!(hits[1].kind, FragmentKind::Image);
    }

    #[tokio::test]
    async fn search_rejects_unknown_kind_tag() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/mm_rag");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/mm_rag/points/query");
                then.status(200).json_body(json!({
                    "result": { "points": [{ "id": "x", "score": 0.1, "payload": { "kind": "audio" } }] }
                }));
            })
            .await;

        let index = QdrantIndex::open(&server.base_url(), None, &options(false))
            .await
            .expect("open");
        let error = index.search(&[1.0, 0.0], 1).await.expect_err("bad kind");
        assert!(matches!(error, StoreError::UnsupportedKind(_)));
    }
}
