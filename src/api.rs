//! HTTP surface for the multimodal RAG pipeline.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /ingest` – Extract, summarize and index a PDF, replacing the active collection.
//!   Returns per-kind counts and the number of fragments dropped by summarization.
//! - `POST /ask` – Answer a query from the active collection. Optional `images` are summarized
//!   and folded into the query first.
//! - `GET /collection` – Describe the active collection, if any.
//! - `DELETE /collection` – Clear the active collection and its persisted state (idempotent).
//! - `GET /metrics` – Ingestion and query counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! The CLI drives the same [`RagApi`] service, so behavior is identical across interfaces.

use crate::processing::{AnswerError, IngestError, IngestReport, Question, RagApi};
use crate::session::CollectionManifest;
use crate::store::StoreError;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the HTTP router exposing the pipeline.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/ingest", post(ingest_document::<S>))
        .route("/ask", post(ask_question::<S>))
        .route(
            "/collection",
            get(describe_collection::<S>).delete(clear_collection::<S>),
        )
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /ingest`.
#[derive(Deserialize)]
struct IngestRequest {
    /// Path of the PDF on the server's filesystem.
    path: PathBuf,
}

/// Ingest a document, replacing whatever collection was active.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError>
where
    S: RagApi,
{
    let report = service.ingest(request.path).await?;
    tracing::info!(
        collection = %report.collection,
        indexed = report.indexed,
        failures = report.failures,
        "Ingest request completed"
    );
    Ok(Json(report))
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    query: String,
    /// Image paths summarized and prepended to the query.
    #[serde(default)]
    images: Vec<PathBuf>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn ask_question<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError>
where
    S: RagApi,
{
    let answer = service
        .ask(Question {
            query: request.query,
            attachments: request.images,
        })
        .await?;
    Ok(Json(AskResponse { answer }))
}

/// Response body for `GET /collection`.
#[derive(Serialize)]
struct CollectionResponse {
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<CollectionManifest>,
}

async fn describe_collection<S>(State(service): State<Arc<S>>) -> Json<CollectionResponse>
where
    S: RagApi,
{
    let manifest = service.collection().await;
    Json(CollectionResponse {
        active: manifest.is_some(),
        manifest,
    })
}

async fn clear_collection<S>(State(service): State<Arc<S>>) -> Result<StatusCode, AppError>
where
    S: RagApi,
{
    service.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Return the pipeline counters.
async fn get_metrics<S>(
    State(service): State<Arc<S>>,
) -> Json<crate::metrics::MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "ingest",
                method: "POST",
                path: "/ingest",
                description: "Extract, summarize and index a PDF, replacing the active collection. Response returns per-kind counts and the number of dropped fragments.",
                request_example: Some(json!({ "path": "docs/paper.pdf" })),
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer a query from the text, tables and images of the active collection.",
                request_example: Some(json!({
                    "query": "What does the efficiency table show?",
                    "images": ["optional/attachment.png"]
                })),
            },
            CommandDescriptor {
                name: "collection",
                method: "GET",
                path: "/collection",
                description: "Describe the active collection, if any.",
                request_example: None,
            },
            CommandDescriptor {
                name: "clear",
                method: "DELETE",
                path: "/collection",
                description: "Remove the active collection and its persisted state. Idempotent.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and query counters.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Ingest(IngestError),
    Answer(AnswerError),
    Store(StoreError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Ingest(
                IngestError::UnsupportedDocument(_)
                | IngestError::NoFragments(_)
                | IngestError::NothingIndexed { .. }
                | IngestError::Summarize(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Ingest(IngestError::Extraction(_)) => StatusCode::BAD_GATEWAY,
            AppError::Answer(AnswerError::Model(_)) => StatusCode::BAD_GATEWAY,
            AppError::Answer(AnswerError::Attachment(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Ingest(IngestError::Store(_))
            | AppError::Answer(AnswerError::Retrieve(_))
            | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Ingest(error) => error.to_string(),
            AppError::Answer(error) => error.to_string(),
            AppError::Store(error) => error.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        Self::Ingest(inner)
    }
}

impl From<AnswerError> for AppError {
    fn from(inner: AnswerError) -> Self {
        Self::Answer(inner)
    }
}

impl From<StoreError> for AppError {
    fn from(inner: StoreError) -> Self {
        Self::Store(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::fragment::KindCounts;
    use crate::metrics::MetricsSnapshot;
    use crate::processing::{AnswerError, IngestError, IngestReport, Question, RagApi};
    use crate::session::CollectionManifest;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_ingest_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let ingest = commands
            .iter()
            .find(|cmd| cmd.name == "ingest")
            .expect("ingest command present");

        assert_eq!(ingest.method, "POST");
        assert_eq!(ingest.path, "/ingest");
        assert!(commands.iter().any(|cmd| cmd.name == "ask"));
    }

    #[tokio::test]
    async fn ingest_route_returns_report() {
        let service = Arc::new(StubRagService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request(Method::POST, "/ingest", json!({ "path": "docs/paper.pdf" })))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["indexed"], 4);
        assert_eq!(json["counts"]["text"], 2);
        assert_eq!(
            service.ingested.lock().await.as_slice(),
            &[PathBuf::from("docs/paper.pdf")]
        );
    }

    #[tokio::test]
    async fn empty_document_maps_to_unprocessable_entity() {
        let service = Arc::new(StubRagService {
            fail_ingest: true,
            ..StubRagService::default()
        });
        let app = create_router(service);

        let response = app
            .oneshot(json_request(Method::POST, "/ingest", json!({ "path": "empty.pdf" })))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert!(json["error"].as_str().expect("message").contains("No fragments"));
    }

    #[tokio::test]
    async fn ask_route_forwards_query_and_images() {
        let service = Arc::new(StubRagService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/ask",
                json!({ "query": "what?", "images": ["a.png"] }),
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["answer"], "answer to what?");
        let questions = service.questions.lock().await;
        assert_eq!(questions[0].attachments, vec![PathBuf::from("a.png")]);
    }

    #[tokio::test]
    async fn delete_collection_returns_no_content() {
        let app = create_router(Arc::new(StubRagService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/collection")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn collection_route_reports_inactive_session() {
        let app = create_router(Arc::new(StubRagService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/collection")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        let json = body_json(response).await;
        assert_eq!(json["active"], false);
        assert!(json.get("manifest").is_none());
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[derive(Default)]
    struct StubRagService {
        ingested: Mutex<Vec<PathBuf>>,
        questions: Mutex<Vec<Question>>,
        fail_ingest: bool,
    }

    #[async_trait]
    impl RagApi for StubRagService {
        async fn ingest(&self, path: PathBuf) -> Result<IngestReport, IngestError> {
            if self.fail_ingest {
                return Err(IngestError::NoFragments(path));
            }
            self.ingested.lock().await.push(path.clone());
            Ok(IngestReport {
                collection: "mm_rag".into(),
                source: path,
                extracted: 4,
                indexed: 4,
                counts: KindCounts {
                    text: 2,
                    table: 1,
                    image: 1,
                },
                failures: 0,
            })
        }

        async fn ask(&self, question: Question) -> Result<String, AnswerError> {
            let answer = format!("answer to {}", question.query);
            self.questions.lock().await.push(question);
            Ok(answer)
        }

        async fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn collection(&self) -> Option<CollectionManifest> {
            None
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }
}
