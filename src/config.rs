use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the multimodal RAG pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the collection holding the active document.
    pub collection_name: String,
    /// Directory holding the vector index, content journal, and manifest.
    pub persist_dir: PathBuf,
    /// Directory where extraction materializes figure images.
    pub image_dir: PathBuf,
    /// Number of records retrieved per query.
    pub top_k: usize,
    /// Vector index backend.
    pub vector_store: VectorStoreKind,
    /// Base URL of the Qdrant instance (required for the `qdrant` backend).
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used for summaries and queries alike.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional base URL override for the embedding provider.
    pub embedding_url: Option<String>,
    /// API key for OpenAI-compatible embedding endpoints.
    pub openai_api_key: Option<String>,
    /// Chat provider used for summarization and answering.
    pub chat_provider: ChatProvider,
    /// Optional base URL override for the chat provider.
    pub chat_url: Option<String>,
    /// Bearer key for the chat provider.
    pub chat_api_key: Option<String>,
    /// Model used for text/table summaries and final answers.
    pub chat_model: String,
    /// Vision-capable model used for image summaries.
    pub vision_model: String,
    /// Sampling temperature for every chat call.
    pub chat_temperature: f32,
    /// Upper bound on generated tokens.
    pub chat_max_tokens: u32,
    /// Retries attempted by chat clients after the first failure.
    pub chat_max_retries: u32,
    /// Extraction backend.
    pub extractor: ExtractorKind,
    /// Base URL of the Unstructured partition API.
    pub unstructured_url: String,
    /// Optional API key for the Unstructured partition API.
    pub unstructured_api_key: Option<String>,
    /// Maximum characters per composite text element.
    pub extract_max_characters: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    /// JSON file inside the persist directory.
    Local,
    /// Remote Qdrant collection.
    Qdrant,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic feature hashing, no network.
    Hash,
}

/// Supported chat backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    /// OpenAI-compatible `chat/completions` (Groq by default).
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported extraction backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    /// Unstructured partition API (hi-res, OCR, tables, figures).
    Unstructured,
    /// Local text-only PDF extraction.
    PdfText,
}

const DEFAULT_COLLECTION: &str = "mm_rag";
const DEFAULT_PERSIST_DIR: &str = "./chroma_db";
const DEFAULT_IMAGE_DIR: &str = "figures";
const DEFAULT_UNSTRUCTURED_URL: &str = "http://127.0.0.1:8000";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let with_default =
            |key: &str, default: &str| optional(key).unwrap_or_else(|| default.to_string());

        let vector_store = parse_or(&optional, "VECTOR_STORE", VectorStoreKind::Local)?;
        let qdrant_url = optional("QDRANT_URL");
        if vector_store == VectorStoreKind::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let top_k = parse_or(&optional, "MMRAG_TOP_K", 4usize)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue("MMRAG_TOP_K".into()));
        }
        let embedding_dimension = parse_or(&optional, "EMBEDDING_DIMENSION", 768usize)?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        Ok(Self {
            collection_name: with_default("MMRAG_COLLECTION_NAME", DEFAULT_COLLECTION),
            persist_dir: PathBuf::from(with_default("MMRAG_PERSIST_DIR", DEFAULT_PERSIST_DIR)),
            image_dir: PathBuf::from(with_default("MMRAG_IMAGE_DIR", DEFAULT_IMAGE_DIR)),
            top_k,
            vector_store,
            qdrant_url,
            qdrant_api_key: optional("QDRANT_API_KEY"),
            embedding_provider: parse_or(&optional, "EMBEDDING_PROVIDER", EmbeddingProvider::Ollama)?,
            embedding_model: with_default("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension,
            embedding_url: optional("EMBEDDING_URL"),
            openai_api_key: optional("OPENAI_API_KEY"),
            chat_provider: parse_or(&optional, "CHAT_PROVIDER", ChatProvider::OpenAI)?,
            chat_url: optional("CHAT_URL"),
            chat_api_key: optional("CHAT_API_KEY").or_else(|| optional("GROQ_API_KEY")),
            chat_model: with_default("CHAT_MODEL", "llama-3.1-8b-instant"),
            vision_model: with_default("VISION_MODEL", "meta-llama/llama-4-scout-17b-16e-instruct"),
            chat_temperature: parse_or(&optional, "CHAT_TEMPERATURE", 0.0f32)?,
            chat_max_tokens: parse_or(&optional, "CHAT_MAX_TOKENS", 800u32)?,
            chat_max_retries: parse_or(&optional, "CHAT_MAX_RETRIES", 2u32)?,
            extractor: parse_or(&optional, "EXTRACTOR", ExtractorKind::Unstructured)?,
            unstructured_url: with_default("UNSTRUCTURED_URL", DEFAULT_UNSTRUCTURED_URL),
            unstructured_api_key: optional("UNSTRUCTURED_API_KEY"),
            extract_max_characters: parse_or(&optional, "EXTRACT_MAX_CHARACTERS", 4000usize)?,
            server_port: optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn parse_or<T, F>(optional: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ChatProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "groq" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ExtractorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unstructured" => Ok(Self::Unstructured),
            "pdf-text" | "pdf_text" | "pdf" => Ok(Self::PdfText),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        collection = %config.collection_name,
        persist_dir = %config.persist_dir.display(),
        vector_store = ?config.vector_store,
        embedding_provider = ?config.embedding_provider,
        chat_provider = ?config.chat_provider,
        extractor = ?config.extractor,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
