#![deny(missing_docs)]

//! Core library for the multimodal RAG pipeline.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF partitioning and fragment classification.
pub mod extraction;
/// Fragment kinds and the records derived from them.
pub mod fragment;
/// Chat-model clients for summaries and answers.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Summarization, retrieval, and answer orchestration.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Caller-owned session state.
pub mod session;
/// Dual-index storage of summary vectors and original content.
pub mod store;
