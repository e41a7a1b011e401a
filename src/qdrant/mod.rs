//! Qdrant vector store integration.

pub mod client;

pub use client::{KindedPoint, QdrantError, QdrantService, ScoredPoint};
