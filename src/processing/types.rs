//! Core data types and error definitions for the ingestion and query pipeline.

use crate::extraction::ExtractionError;
use crate::fragment::KindCounts;
use crate::llm::ChatClientError;
use crate::processing::summarize::SummarizeError;
use crate::store::StoreError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::processing::Retriever::ingest`].
///
/// Every variant is returned to the caller; none terminates the process.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The path does not name a supported document.
    #[error("Unsupported document: {0} (expected a .pdf file)")]
    UnsupportedDocument(PathBuf),
    /// Extraction failed.
    #[error("Failed to extract document: {0}")]
    Extraction(#[from] ExtractionError),
    /// Extraction produced nothing to index.
    #[error("No fragments were extracted from {0}")]
    NoFragments(PathBuf),
    /// A fatal summarization error aborted ingestion.
    #[error("Summarization aborted ingestion: {0}")]
    Summarize(#[from] SummarizeError),
    /// Every fragment failed to summarize.
    #[error("None of the {failures} extracted fragments could be summarized")]
    NothingIndexed {
        /// Number of dropped fragments.
        failures: usize,
    },
    /// Writing or clearing the collection failed.
    #[error("Storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by query-time retrieval.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// No document has been ingested in this session.
    #[error("No active collection")]
    NoActiveCollection,
    /// Search failed.
    #[error("Retrieval failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned while answering a query.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Retrieval failed.
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    /// An attached image could not be summarized.
    #[error("Failed to summarize attached image: {0}")]
    Attachment(#[from] SummarizeError),
    /// The language model failed after retries.
    #[error("Language model failed: {0}")]
    Model(#[from] ChatClientError),
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Collection that now holds the document.
    pub collection: String,
    /// Ingested document.
    pub source: PathBuf,
    /// Fragments produced by extraction.
    pub extracted: usize,
    /// Entries written to the dual store.
    pub indexed: usize,
    /// Indexed entries per kind.
    pub counts: KindCounts,
    /// Fragments dropped after a recoverable summarization failure.
    pub failures: usize,
}
