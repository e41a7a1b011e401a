//! Document pipeline: summarization, retrieval, and answer orchestration.

pub mod answer;
pub mod retriever;
mod service;
pub mod summarize;
pub mod types;

pub use answer::{AnswerOrchestrator, NO_DOCUMENT_MESSAGE, PartitionedContext, Question};
pub use retriever::{Retriever, RetrieverOptions};
pub use service::{RagApi, RagService};
pub use summarize::{SummarizeError, SummaryBatch, Summarizer};
pub use types::{AnswerError, IngestError, IngestReport, RetrieveError};
