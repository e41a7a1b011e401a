//! Chat-model clients used for fragment summaries and final answers.
//!
//! Requests are a list of typed content blocks so the same trait covers the text model and the
//! vision model. Two wire formats are supported: OpenAI-compatible `chat/completions` (Groq,
//! OpenAI, vLLM) and Ollama's `/api/chat`. Every client carries its own bounded retry policy;
//! callers never retry on top of it.

use crate::config::{ChatProvider, Config};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENAI_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const RETRY_STEP: Duration = Duration::from_millis(200);

/// Errors surfaced while invoking a chat model.
#[derive(Debug, Error)]
pub enum ChatClientError {
    /// Provider was unreachable or returned a transient failure.
    #[error("Chat provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl ChatClientError {
    fn is_retryable(&self) -> bool {
        matches!(self, ChatClientError::ProviderUnavailable(_))
    }
}

/// One typed block of a multimodal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    /// Plain text instruction or context.
    Text(String),
    /// Inline base64 image tagged with its MIME type.
    Image {
        /// MIME type such as `image/png`.
        mime_type: String,
        /// Base64 (standard alphabet) encoded bytes.
        data_base64: String,
    },
}

/// Single user turn sent to a chat model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatRequest {
    /// Ordered content blocks.
    pub blocks: Vec<ContentBlock>,
}

impl ChatRequest {
    /// Request made of one text block.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::Text(prompt.into())],
        }
    }

    /// Append a block.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.blocks.push(block);
        self
    }

    /// Concatenated text blocks, used by providers without block support.
    pub fn joined_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Interface implemented by chat-model providers.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send one request and return the response text.
    async fn invoke(&self, request: ChatRequest) -> Result<String, ChatClientError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

/// Generation settings shared by every provider.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
}

impl ChatSettings {
    /// Settings for `model` using the configured generation bounds.
    pub fn from_config(config: &Config, model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: config.chat_temperature,
            max_tokens: config.chat_max_tokens,
            max_retries: config.chat_max_retries,
        }
    }
}

/// Build the text-capable client used for text/table summaries and answers.
pub fn get_text_client(config: &Config) -> Arc<dyn ChatClient> {
    build_client(config, ChatSettings::from_config(config, &config.chat_model))
}

/// Build the vision-capable client used for image summaries.
pub fn get_vision_client(config: &Config) -> Arc<dyn ChatClient> {
    build_client(config, ChatSettings::from_config(config, &config.vision_model))
}

fn build_client(config: &Config, settings: ChatSettings) -> Arc<dyn ChatClient> {
    match config.chat_provider {
        ChatProvider::OpenAI => Arc::new(OpenAiChatClient::new(
            config
                .chat_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            config.chat_api_key.clone(),
            settings,
        )),
        ChatProvider::Ollama => Arc::new(OllamaChatClient::new(
            config
                .chat_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            settings,
        )),
    }
}

fn http_client() -> Client {
    Client::builder()
        .user_agent("mmrag/chat")
        .build()
        .expect("Failed to construct reqwest::Client for chat")
}

async fn with_retries<F, Fut>(
    model: &str,
    max_retries: u32,
    mut attempt_once: F,
) -> Result<String, ChatClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, ChatClientError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_once().await {
            Ok(text) => return Ok(text),
            Err(error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(model, attempt, error = %error, "Chat call failed; retrying");
                tokio::time::sleep(RETRY_STEP * attempt).await;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn classify_failure(response: reqwest::Response, provider: &str) -> ChatClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{provider} returned {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ChatClientError::ProviderUnavailable(message)
    } else {
        ChatClientError::GenerationFailed(message)
    }
}

/// Client for OpenAI-compatible `chat/completions` endpoints.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    settings: ChatSettings,
}

impl OpenAiChatClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.groq.com/openai/v1`).
    pub fn new(base_url: String, api_key: Option<String>, settings: ChatSettings) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key,
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        let content: Vec<Value> = request
            .blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
                ContentBlock::Image {
                    mime_type,
                    data_base64,
                } => json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data_base64}") }
                }),
            })
            .collect();

        json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        })
    }

    async fn attempt(&self, payload: &Value) -> Result<String, ChatClientError> {
        let mut builder = self.http.post(self.endpoint()).json(payload);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|error| {
            ChatClientError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            return Err(classify_failure(response, "chat provider").await);
        }

        let body: OpenAiResponse = response.json().await.map_err(|error| {
            ChatClientError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatClientError::InvalidResponse("completion had no choices".into()))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn invoke(&self, request: ChatRequest) -> Result<String, ChatClientError> {
        let payload = self.payload(&request);
        with_retries(&self.settings.model, self.settings.max_retries, || {
            self.attempt(&payload)
        })
        .await
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

/// Client for the Ollama `/api/chat` endpoint.
pub struct OllamaChatClient {
    http: Client,
    base_url: String,
    settings: ChatSettings,
}

impl OllamaChatClient {
    /// Create a client rooted at `base_url` (e.g. `http://127.0.0.1:11434`).
    pub fn new(base_url: String, settings: ChatSettings) -> Self {
        Self {
            http: http_client(),
            base_url,
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        let images: Vec<&str> = request
            .blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Image { data_base64, .. } => Some(data_base64.as_str()),
                ContentBlock::Text(_) => None,
            })
            .collect();

        let mut message = json!({ "role": "user", "content": request.joined_text() });
        if !images.is_empty() {
            message["images"] = json!(images);
        }

        json!({
            "model": self.settings.model,
            "stream": false,
            "messages": [message],
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens,
            }
        })
    }

    async fn attempt(&self, payload: &Value) -> Result<String, ChatClientError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(payload)
            .send()
            .await
            .map_err(|error| {
                ChatClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChatClientError::GenerationFailed(format!(
                "Ollama endpoint {} returned 404 (is model {} pulled?)",
                self.endpoint(),
                self.settings.model
            )));
        }

        if !response.status().is_success() {
            return Err(classify_failure(response, "Ollama").await);
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            ChatClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(ChatClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.message.content)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl ChatClient for OllamaChatClient {
    async fn invoke(&self, request: ChatRequest) -> Result<String, ChatClientError> {
        let payload = self.payload(&request);
        with_retries(&self.settings.model, self.settings.max_retries, || {
            self.attempt(&payload)
        })
        .await
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn settings(max_retries: u32) -> ChatSettings {
        ChatSettings {
            model: "llama-3.1-8b-instant".into(),
            temperature: 0.0,
            max_tokens: 800,
            max_retries,
        }
    }

    #[tokio::test]
    async fn openai_client_sends_blocks_and_reads_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions").json_body_partial(
                        r#"{"max_tokens":800,"messages":[{"role":"user","content":[{"type":"text","text":"Describe"},{"type":"image_url","image_url":{"url":"data:image/png;base64,AAAA"}}]}]}"#,
                    );
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "A bar chart" } }]
                }));
            })
            .await;

        let client =
            OpenAiChatClient::new(server.base_url(), Some("gsk-test".into()), settings(0));
        let request = ChatRequest::text("Describe").with_block(ContentBlock::Image {
            mime_type: "image/png".into(),
            data_base64: "AAAA".into(),
        });

        let text = client.invoke(request).await.expect("completion");
        mock.assert_async().await;
        assert_eq!(text, "A bar chart");
    }

    #[tokio::test]
    async fn openai_client_retries_transient_failures_a_bounded_number_of_times() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let client = OpenAiChatClient::new(server.base_url(), None, settings(2));
        let error = client
            .invoke(ChatRequest::text("hello"))
            .await
            .expect_err("always failing");

        mock.assert_hits_async(3).await;
        assert!(matches!(error, ChatClientError::ProviderUnavailable(message) if message.contains("503")));
    }

    #[tokio::test]
    async fn openai_client_does_not_retry_rejected_requests() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400).body("bad request");
            })
            .await;

        let client = OpenAiChatClient::new(server.base_url(), None, settings(2));
        let error = client
            .invoke(ChatRequest::text("hello"))
            .await
            .expect_err("rejected");

        mock.assert_hits_async(1).await;
        assert!(matches!(error, ChatClientError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn ollama_client_moves_images_into_message() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat").json_body_partial(
                    r#"{"stream":false,"messages":[{"role":"user","content":"Summarize","images":["QUJD"]}]}"#,
                );
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "Summary text" },
                    "done": true
                }));
            })
            .await;

        let client = OllamaChatClient::new(server.base_url(), settings(0));
        let request = ChatRequest::text("Summarize").with_block(ContentBlock::Image {
            mime_type: "image/jpeg".into(),
            data_base64: "QUJD".into(),
        });

        let text = client.invoke(request).await.expect("summary");
        mock.assert_async().await;
        assert_eq!(text, "Summary text");
    }

    #[test]
    fn joined_text_skips_image_blocks() {
        let request = ChatRequest::text("first")
            .with_block(ContentBlock::Image {
                mime_type: "image/png".into(),
                data_base64: "AAAA".into(),
            })
            .with_block(ContentBlock::Text("second".into()));
        assert_eq!(request.joined_text(), "first\nsecond");
    }
}
