//! HTTP client for the Qdrant collections that hold summary vectors.
//!
//! Every point carries a single `kind` payload field next to its vector.

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

const SCROLL_PAGE: usize = 512;

/// Errors returned while talking to Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL could not be parsed.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// Transport failure or undecodable body.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status from Qdrant.
    #[error("Qdrant returned {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, possibly empty.
        body: String,
    },
}

/// Summary vector to upsert under a caller-assigned id.
#[derive(Debug, Clone)]
pub struct KindedPoint {
    /// Entry id shared with the content store.
    pub id: String,
    /// Summary embedding.
    pub vector: Vec<f32>,
    /// Fragment kind tag stored in the payload.
    pub kind: String,
}

/// Search hit with its raw kind tag.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Entry id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// `kind` payload field, if the point has one.
    pub kind: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct QueryPage {
    #[serde(default)]
    points: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<KindPayload>,
}

#[derive(Deserialize)]
struct KindPayload {
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ScrollPage {
    #[serde(default)]
    points: Vec<PointRef>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct PointRef {
    id: Value,
}

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a new client for the instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("mmrag/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key.as_deref().map(|value| !value.is_empty()).unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Check whether a collection exists.
    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::Status { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection created");
        })
        .await
    }

    /// Delete a collection; a missing collection is not an error.
    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), QdrantError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{collection_name}"))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection = collection_name, "Collection already absent");
            return Ok(());
        }

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection deleted");
        })
        .await
    }

    /// Upsert points with caller-assigned identifiers in one batch.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<KindedPoint>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let serialized: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": { "kind": point.kind },
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Delete points by identifier.
    pub async fn delete_points(
        &self,
        collection_name: &str,
        ids: &[String],
    ) -> Result<(), QdrantError> {
        if ids.is_empty() {
            return Ok(());
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": ids }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = ids.len(),
                "Points deleted"
            );
        })
        .await
    }

    /// Perform a similarity search against a collection, returning scored payloads.
    pub async fn search_points(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::Status { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let Envelope { result } = response.json::<Envelope<QueryPage>>().await?;
        Ok(result
            .points
            .into_iter()
            .map(|hit| ScoredPoint {
                id: stringify_point_id(hit.id),
                score: hit.score,
                kind: hit.payload.and_then(|payload| payload.kind),
            })
            .collect())
    }

    /// Enumerate every point identifier in the collection.
    pub async fn scroll_point_ids(&self, collection: &str) -> Result<Vec<String>, QdrantError> {
        let mut offset: Option<Value> = None;
        let mut ids = Vec::new();

        loop {
            let mut body = json!({
                "with_payload": false,
                "with_vector": false,
                "limit": SCROLL_PAGE,
            });
            if let (Some(next), Some(object)) = (offset.take(), body.as_object_mut()) {
                object.insert("offset".into(), next);
            }

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{collection}/points/scroll"),
                )
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::Status { status, body };
                tracing::error!(collection, error = %error, "Failed to scroll point ids");
                return Err(error);
            }

            let Envelope { result } = response.json::<Envelope<ScrollPage>>().await?;
            ids.extend(
                result
                    .points
                    .into_iter()
                    .map(|point| stringify_point_id(point.id)),
            );

            match result.next_page_offset {
                Some(Value::Null) | None => break,
                Some(next) => offset = Some(next),
            }
        }

        Ok(ids)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::Status { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, POST, PUT},
        MockServer,
    };

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), None).expect("service")
    }

    #[tokio::test]
    async fn search_points_maps_scored_payloads() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/mm_rag/points/query")
                    .json_body_partial(r#"{"limit":3,"with_payload":true}"#);
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            { "id": "7f8e", "score": 0.42, "payload": { "kind": "table" } }
                        ]
                    }
                }));
            })
            .await;

        let results = service(&server)
            .search_points("mm_rag", &[0.1, 0.2], 3)
            .await
            .expect("search request");

        mock.assert_async().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "7f8e");
        assert!((results[0].score - 0.42).abs() < f32::EPSILON);
        assert_eq!(results[0].kind.as_deref(), Some("table"));
    }

    #[tokio::test]
    async fn upsert_points_keeps_caller_ids() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/mm_rag/points")
                    .query_param("wait", "true")
                    .json_body_partial(r#"{"points":[{"id":"id-1","payload":{"kind":"text"}}]}"#);
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        let written = service(&server)
            .upsert_points(
                "mm_rag",
                vec![KindedPoint {
                    id: "id-1".into(),
                    vector: vec![1.0, 0.0],
                    kind: "text".into(),
                }],
            )
            .await
            .expect("upsert");

        mock.assert_async().await;
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn delete_collection_tolerates_missing_collection() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/mm_rag");
                then.status(404).body("Not found");
            })
            .await;

        service(&server)
            .delete_collection("mm_rag")
            .await
            .expect("idempotent delete");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn scroll_point_ids_follows_pagination() {
        let server = MockServer::start_async().await;
        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/mm_rag/points/scroll")
                    .json_body_partial(r#"{"offset":"b"}"#);
                then.status(200).json_body(json!({
                    "result": { "points": [{ "id": "b" }], "next_page_offset": null }
                }));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/mm_rag/points/scroll");
                then.status(200).json_body(json!({
                    "result": { "points": [{ "id": "a" }], "next_page_offset": "b" }
                }));
            })
            .await;

        let ids = service(&server)
            .scroll_point_ids("mm_rag")
            .await
            .expect("scroll");

        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn point_ids_stringify_uuid_objects() {
        assert_eq!(stringify_point_id(json!(12)), "12");
        assert_eq!(stringify_point_id(json!({ "uuid": "abc" })), "abc");
        assert_eq!(stringify_point_id(Value::Null), "");
    }
}
