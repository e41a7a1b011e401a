//! Fragment summarization for semantic retrieval.
//!
//! Text and tables are summarized by the text model; images are base64-encoded and sent to the
//! vision model as an inline block. Model failures and empty answers are recoverable: the batch
//! step drops the fragment and counts it. A missing or unreadable image aborts the batch.

use crate::fragment::{Fragment, FragmentKind, KindCounts, SummarizedFragment};
use crate::llm::{ChatClient, ChatClientError, ChatRequest, ContentBlock};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const TEXT_PROMPT: &str = "You are given a text. Summarize it in a few sentences for semantic retrieval.
Do not include any additional words like Summary: etc.
---
Here is the text:
";

const TABLE_PROMPT: &str = "You are given a table. Summarize the table for semantic retrieval.
Do not include any additional words like Summary: etc.
---
Here is the table:
";

const IMAGE_PROMPT: &str = "You are given a image. Summarize the image for semantic retrieval.
Do not include words like \"Summary: etc.
";

/// Errors raised while summarizing a single fragment.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The model call failed after its retry budget.
    #[error("Model failed to summarize {kind} fragment: {source}")]
    Model {
        /// Kind of the fragment.
        kind: FragmentKind,
        /// Underlying client error.
        #[source]
        source: ChatClientError,
    },
    /// The model answered with nothing usable.
    #[error("Model returned an empty summary for {0} fragment")]
    EmptySummary(FragmentKind),
    /// An image fragment points at a file that does not exist.
    #[error("Image path does not exist: {0}")]
    MissingImage(PathBuf),
    /// An image file exists but could not be read.
    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        /// Image path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SummarizeError {
    /// Whether the fragment can be dropped and the batch continued.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Model { .. } | Self::EmptySummary(_))
    }
}

/// Result of summarizing every fragment of a document.
#[derive(Debug, Default)]
pub struct SummaryBatch {
    /// Fragments that received a summary, in input order.
    pub summarized: Vec<SummarizedFragment>,
    /// Summarized fragments per kind.
    pub counts: KindCounts,
    /// Fragments dropped after a recoverable error.
    pub failures: usize,
}

/// Dispatches fragments to the text or vision model.
#[derive(Clone)]
pub struct Summarizer {
    text_client: Arc<dyn ChatClient>,
    vision_client: Arc<dyn ChatClient>,
}

impl Summarizer {
    /// Summarizer using `text_client` for text and tables and `vision_client` for images.
    pub fn new(text_client: Arc<dyn ChatClient>, vision_client: Arc<dyn ChatClient>) -> Self {
        Self {
            text_client,
            vision_client,
        }
    }

    /// Summarize one fragment.
    pub async fn summarize(&self, fragment: &Fragment) -> Result<String, SummarizeError> {
        let kind = fragment.kind();
        let (client, request) = match fragment {
            Fragment::Text(text) => (
                &self.text_client,
                ChatRequest::text(format!("{TEXT_PROMPT}{text}\n")),
            ),
            Fragment::Table(table) => (
                &self.text_client,
                ChatRequest::text(format!("{TABLE_PROMPT}{table}\n")),
            ),
            Fragment::Image(path) => (&self.vision_client, image_request(path).await?),
        };

        let summary = client
            .invoke(request)
            .await
            .map_err(|source| SummarizeError::Model { kind, source })?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(SummarizeError::EmptySummary(kind));
        }
        Ok(summary.to_string())
    }

    /// Summarize an image file directly, e.g. one attached to a query.
    pub async fn summarize_image(&self, path: &Path) -> Result<String, SummarizeError> {
        self.summarize(&Fragment::Image(path.to_path_buf())).await
    }

    /// Summarize fragments one at a time, dropping those with recoverable failures.
    pub async fn summarize_all(
        &self,
        fragments: Vec<Fragment>,
    ) -> Result<SummaryBatch, SummarizeError> {
        let mut batch = SummaryBatch::default();
        for fragment in fragments {
            match self.summarize(&fragment).await {
                Ok(summary) => {
                    batch.counts.record(fragment.kind());
                    batch.summarized.push(SummarizedFragment { fragment, summary });
                }
                Err(error) if error.is_recoverable() => {
                    tracing::warn!(
                        kind = %fragment.kind(),
                        error = %error,
                        "Dropping fragment after summarization failure"
                    );
                    batch.failures += 1;
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(
            summarized = batch.summarized.len(),
            text = batch.counts.text,
            table = batch.counts.table,
            image = batch.counts.image,
            failures = batch.failures,
            "Summarized fragments"
        );
        Ok(batch)
    }
}

async fn image_request(path: &Path) -> Result<ChatRequest, SummarizeError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(SummarizeError::MissingImage(path.to_path_buf()));
        }
        Err(source) => {
            return Err(SummarizeError::ImageRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(ChatRequest::text(IMAGE_PROMPT).with_block(ContentBlock::Image {
        mime_type: image_mime_type(path).to_string(),
        data_base64: STANDARD.encode(bytes),
    }))
}

/// MIME type for an image path, defaulting to JPEG.
pub(crate) fn image_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Chat double answering from a script and recording every request.
    struct ScriptedChat {
        replies: Mutex<Vec<Result<String, ChatClientError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<Result<String, ChatClientError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn invoke(&self, request: ChatRequest) -> Result<String, ChatClientError> {
            self.requests.lock().expect("lock").push(request);
            self.replies
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Ok("default summary".into()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn text_and_tables_use_text_model_with_payload_in_prompt() {
        let text = ScriptedChat::new(vec![Ok("text summary".into()), Ok(" table summary ".into())]);
        let vision = ScriptedChat::new(vec![]);
        let summarizer = Summarizer::new(text.clone(), vision.clone());

        let first = summarizer
            .summarize(&Fragment::Text("Solar output rose.".into()))
            .await
            .expect("text");
        let second = summarizer
            .summarize(&Fragment::Table("| year | output |".into()))
            .await
            .expect("table");

        assert_eq!(first, "text summary");
        assert_eq!(second, "table summary");
        let requests = text.requests();
        assert!(requests[0].joined_text().contains("Here is the text:\nSolar output rose."));
        assert!(requests[1].joined_text().contains("Here is the table:\n| year | output |"));
        assert!(vision.requests().is_empty());
    }

    #[tokio::test]
    async fn images_are_sent_inline_to_vision_model() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("chart.PNG");
        tokio::fs::write(&path, b"png bytes").await.expect("write");

        let text = ScriptedChat::new(vec![]);
        let vision = ScriptedChat::new(vec![Ok("a bar chart".into())]);
        let summarizer = Summarizer::new(text.clone(), vision.clone());

        let summary = summarizer
            .summarize(&Fragment::Image(path))
            .await
            .expect("image");
        assert_eq!(summary, "a bar chart");

        let requests = vision.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].blocks[1],
            ContentBlock::Image {
                mime_type: "image/png".into(),
                data_base64: STANDARD.encode(b"png bytes"),
            }
        );
        assert!(text.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_image_is_fatal() {
        let chat = ScriptedChat::new(vec![]);
        let summarizer = Summarizer::new(chat.clone(), chat.clone());

        let error = summarizer
            .summarize_all(vec![
                Fragment::Text("ok".into()),
                Fragment::Image(PathBuf::from("/nonexistent/figure.jpg")),
            ])
            .await
            .expect_err("fatal");
        assert!(matches!(error, SummarizeError::MissingImage(_)));
        assert!(!error.is_recoverable());
    }

    #[tokio::test]
    async fn batch_drops_recoverable_failures_and_counts_them() {
        let text = ScriptedChat::new(vec![
            Ok("first".into()),
            Err(ChatClientError::GenerationFailed("boom".into())),
            Ok("   ".into()),
            Ok("table".into()),
        ]);
        let summarizer = Summarizer::new(text.clone(), text.clone());

        let batch = summarizer
            .summarize_all(vec![
                Fragment::Text("a".into()),
                Fragment::Text("b".into()),
                Fragment::Text("c".into()),
                Fragment::Table("t".into()),
            ])
            .await
            .expect("batch");

        assert_eq!(batch.failures, 2);
        assert_eq!(batch.counts.text, 1);
        assert_eq!(batch.counts.table, 1);
        assert_eq!(
            batch
                .summarized
                .iter()
                .map(|item| item.summary.as_str())
                .collect::<Vec<_>>(),
            vec!["first", "table"]
        );
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(image_mime_type(Path::new("a.png")), "image/png");
        assert_eq!(image_mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("a")), "image/jpeg");
    }
}
