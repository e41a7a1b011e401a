//! Embedding clients shared by ingestion and query-time search.
//!
//! A store owns exactly one client and uses it for both summary vectors and query vectors, so
//! scores are always computed in the same space.

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider returned vectors of the wrong size.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Size of every produced vector.
    fn dimension(&self) -> usize;
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(config: &Config) -> Arc<dyn EmbeddingClient> {
    match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config
                .embedding_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config
                .embedding_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )),
    }
}

fn validate(
    embeddings: Vec<Vec<f32>>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingClientError::CountMismatch {
            expected: expected_count,
            actual: embeddings.len(),
        });
    }
    if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimension) {
        return Err(EmbeddingClientError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(embeddings)
}

fn http_client() -> Client {
    Client::builder()
        .user_agent("mmrag/embedding")
        .build()
        .expect("Failed to construct reqwest::Client for embeddings")
}

/// Deterministic, network-free embedding based on hashed word features.
///
/// Texts sharing words land close together, which is enough for offline runs and tests.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of `dimension` slots.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let position = (hash % dimension as u64) as usize;
            // Sign bit spreads collisions instead of stacking them.
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Client for Ollama's batch `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: String, model: String, dimension: usize) -> Self {
        Self {
            http: http_client(),
            base_url,
            model,
            dimension,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        tracing::debug!(model = %self.model, inputs = expected, "Generating embeddings");

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::GenerationFailed(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!(
                "failed to decode Ollama embeddings: {error}"
            ))
        })?;

        validate(body.embeddings, expected, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: String, api_key: Option<String>, model: String, dimension: usize) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key,
            model,
            dimension,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        tracing::debug!(model = %self.model, inputs = expected, "Generating embeddings");

        let mut request = self
            .http
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings endpoint returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("failed to decode embeddings: {error}"))
        })?;
        body.data.sort_by_key(|item| item.index);

        validate(
            body.data.into_iter().map(|item| item.embedding).collect(),
            expected,
            self.dimension,
        )
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
