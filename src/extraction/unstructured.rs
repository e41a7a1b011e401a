//! Client for the Unstructured partition API (`/general/v0/general`).
//!
//! Documents are partitioned with the hi-res strategy, table structure inference and by-title
//! chunking. Image blocks come back base64-encoded in element metadata; they are written into
//! the image directory under a content-hash name so repeated figures collapse into one file.

use super::{Element, ExtractionError, Extractor};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const PARTITION_PATH: &str = "general/v0/general";
const API_KEY_HEADER: &str = "unstructured-api-key";

#[derive(Deserialize)]
struct ApiElement {
    #[serde(rename = "type", default)]
    category: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: ApiMetadata,
}

#[derive(Deserialize, Default)]
struct ApiMetadata {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    image_mime_type: Option<String>,
}

/// Extractor backed by an Unstructured API deployment.
pub struct UnstructuredExtractor {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_characters: usize,
}

impl UnstructuredExtractor {
    /// Client for the deployment at `base_url`.
    pub fn new(base_url: String, api_key: Option<String>, max_characters: usize) -> Self {
        let http = Client::builder()
            .user_agent("mmrag/extract")
            .build()
            .expect("Failed to construct reqwest::Client for extraction");
        Self {
            http,
            base_url,
            api_key,
            max_characters,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{PARTITION_PATH}", self.base_url.trim_end_matches('/'))
    }

    async fn build_form(&self, document: &Path) -> Result<Form, ExtractionError> {
        let bytes = tokio::fs::read(document)
            .await
            .map_err(|error| ExtractionError::io(document, error))?;
        let file_name = document
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;

        Ok(Form::new()
            .part("files", part)
            .text("strategy", "hi_res")
            .text("chunking_strategy", "by_title")
            .text("max_characters", self.max_characters.to_string())
            .text("pdf_infer_table_structure", "true")
            .text("extract_image_block_types", r#"["Image"]"#))
    }
}

#[async_trait]
impl Extractor for UnstructuredExtractor {
    async fn partition(
        &self,
        document: &Path,
        image_dir: &Path,
    ) -> Result<Vec<Element>, ExtractionError> {
        let form = self.build_form(document).await?;
        let mut request = self.http.post(self.endpoint()).multipart(form);
        if let Some(key) = &self.api_key
            && !key.is_empty()
        {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, document = %document.display(), "Partition request failed");
            return Err(ExtractionError::Service { status, body });
        }

        let elements: Vec<ApiElement> = response
            .json()
            .await
            .map_err(|error| ExtractionError::Decode(error.to_string()))?;

        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(encoded) = element.metadata.image_base64.as_deref() {
                let path = write_figure(
                    image_dir,
                    encoded,
                    element.metadata.image_mime_type.as_deref(),
                )
                .await?;
                tracing::debug!(path = %path.display(), "Wrote extracted figure");
            }
            out.push(Element {
                category: element.category,
                text: element.text,
            });
        }
        Ok(out)
    }
}

async fn write_figure(
    image_dir: &Path,
    encoded: &str,
    mime_type: Option<&str>,
) -> Result<PathBuf, ExtractionError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|error| ExtractionError::Decode(format!("figure is not base64: {error}")))?;
    let digest = hex::encode(Sha256::digest(&bytes));
    let extension = match mime_type {
        Some("image/png") => "png",
        _ => "jpg",
    };
    let path = image_dir.join(format!("figure-{}.{extension}", &digest[..16]));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|error| ExtractionError::io(&path, error))?;
    Ok(path)
}
