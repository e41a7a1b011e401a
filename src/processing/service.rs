//! Pipeline service shared by the CLI and the HTTP surface.

use crate::{
    config::Config,
    embedding::get_embedding_client,
    extraction::build_extractor,
    llm::{get_text_client, get_vision_client},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        answer::{AnswerOrchestrator, NO_DOCUMENT_MESSAGE, Question},
        retriever::{Retriever, RetrieverOptions},
        summarize::Summarizer,
        types::{AnswerError, IngestError, IngestReport},
    },
    session::{CollectionManifest, Session},
    store::{IndexBackend, ReconcileReport, StoreError},
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Abstraction over the pipeline used by external surfaces (CLI, HTTP).
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Replace the active collection with the contents of the document at `path`.
    async fn ingest(&self, path: PathBuf) -> Result<IngestReport, IngestError>;

    /// Answer a question from the active collection.
    async fn ask(&self, question: Question) -> Result<String, AnswerError>;

    /// Drop the active collection and its persisted state.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Manifest of the active collection, if any.
    async fn collection(&self) -> Option<CollectionManifest>;

    /// Current metrics snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the retriever, the answer orchestrator and one [`Session`].
///
/// The session sits behind a mutex so ingestion, clearing and queries never interleave.
pub struct RagService {
    retriever: Arc<Retriever>,
    orchestrator: AnswerOrchestrator,
    session: Mutex<Session>,
    metrics: PipelineMetrics,
}

impl RagService {
    /// Assemble a service from pre-built components.
    pub fn new(retriever: Arc<Retriever>, orchestrator: AnswerOrchestrator) -> Self {
        Self {
            retriever,
            orchestrator,
            session: Mutex::new(Session::create()),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Build every component from configuration.
    pub fn from_config(config: &Config) -> Self {
        tracing::info!(
            extractor = ?config.extractor,
            embedding = ?config.embedding_provider,
            chat = ?config.chat_provider,
            vector_store = ?config.vector_store,
            "Initializing pipeline"
        );
        let summarizer = Summarizer::new(get_text_client(config), get_vision_client(config));
        let retriever = Arc::new(Retriever::new(
            build_extractor(config),
            summarizer,
            get_embedding_client(config),
            IndexBackend::from_config(config),
            RetrieverOptions {
                collection: config.collection_name.clone(),
                persist_dir: config.persist_dir.clone(),
                image_dir: config.image_dir.clone(),
            },
        ));
        let orchestrator =
            AnswerOrchestrator::new(retriever.clone(), get_text_client(config), config.top_k);
        Self::new(retriever, orchestrator)
    }

    /// Reactivate a collection left by an earlier process.
    pub async fn restore(&self) -> Result<Option<ReconcileReport>, StoreError> {
        let mut session = self.session.lock().await;
        self.retriever.restore(&mut session).await
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn ingest(&self, path: PathBuf) -> Result<IngestReport, IngestError> {
        let mut session = self.session.lock().await;
        match self.retriever.ingest(&mut session, &path).await {
            Ok(report) => {
                self.metrics
                    .record_ingestion(&report.counts, report.failures as u64);
                Ok(report)
            }
            Err(error) => {
                if let IngestError::NothingIndexed { failures } = &error {
                    self.metrics.record_summary_failures(*failures as u64);
                }
                Err(error)
            }
        }
    }

    async fn ask(&self, question: Question) -> Result<String, AnswerError> {
        let session = self.session.lock().await;
        let answer = self.orchestrator.answer_question(&session, &question).await?;
        if session.is_active() {
            self.metrics.record_query();
        } else {
            tracing::info!(message = NO_DOCUMENT_MESSAGE, "Query received before ingestion");
        }
        Ok(answer)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut session = self.session.lock().await;
        self.retriever.clear(&mut session).await
    }

    async fn collection(&self) -> Option<CollectionManifest> {
        self.session.lock().await.manifest().cloned()
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
