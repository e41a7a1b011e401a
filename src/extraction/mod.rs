//! Document extraction: partition a PDF into categorized elements and map them to fragments.
//!
//! Backends implement [`Extractor`] and only return raw elements (plus any figures they write
//! into the image directory). Classification and image collection live here so every backend
//! produces fragments the same way:
//!
//! - `Table` elements become [`Fragment::Table`].
//! - `CompositeElement` elements become [`Fragment::Text`].
//! - Every `.jpg`/`.jpeg`/`.png` in the image directory becomes a [`Fragment::Image`], appended
//!   after text and tables in file-name order.
//! - Anything else is logged and dropped.

pub mod pdf_text;
pub mod unstructured;

pub use pdf_text::PdfTextExtractor;
pub use unstructured::UnstructuredExtractor;

use crate::config::{Config, ExtractorKind};
use crate::fragment::Fragment;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

const DOCUMENT_EXTENSION: &str = "pdf";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Errors raised while extracting fragments.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The partition service could not be reached.
    #[error("Extraction request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The partition service rejected the document.
    #[error("Extraction service returned {status}: {body}")]
    Service {
        /// HTTP status.
        status: reqwest::StatusCode,
        /// Response body.
        body: String,
    },
    /// The service response or an embedded figure could not be decoded.
    #[error("Invalid extraction output: {0}")]
    Decode(String),
    /// Local PDF parsing failed.
    #[error("PDF parsing failed: {0}")]
    Pdf(String),
}

impl ExtractionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Categorized element returned by a partition backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Category label, e.g. `CompositeElement` or `Table`.
    pub category: String,
    /// Element text.
    pub text: String,
}

impl Element {
    /// Element with the given category and text.
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
        }
    }
}

/// Partition backend.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Partition `document` into ordered elements. Figures, when supported, are written into
    /// `image_dir`.
    async fn partition(
        &self,
        document: &Path,
        image_dir: &Path,
    ) -> Result<Vec<Element>, ExtractionError>;
}

/// Build the extractor selected by the configuration.
pub fn build_extractor(config: &Config) -> Arc<dyn Extractor> {
    match config.extractor {
        ExtractorKind::Unstructured => Arc::new(UnstructuredExtractor::new(
            config.unstructured_url.clone(),
            config.unstructured_api_key.clone(),
            config.extract_max_characters,
        )),
        ExtractorKind::PdfText => Arc::new(PdfTextExtractor::new(config.extract_max_characters)),
    }
}

/// Documents to ingest for `path`: the path itself when it has a `.pdf` extension.
pub fn locate_documents(path: &Path) -> Vec<PathBuf> {
    let located: Vec<PathBuf> = has_extension(path, &[DOCUMENT_EXTENSION])
        .then(|| path.to_path_buf())
        .into_iter()
        .collect();
    tracing::info!(path = %path.display(), located = located.len(), "Located documents");
    located
}

/// Map one element to a fragment, or `None` for categories that are not indexed.
pub fn classify_element(element: Element) -> Option<Fragment> {
    match element.category.as_str() {
        "Table" => Some(Fragment::Table(element.text)),
        "CompositeElement" => Some(Fragment::Text(element.text)),
        other => {
            tracing::debug!(category = other, "Dropping unsupported element category");
            None
        }
    }
}

/// Remove any figures left by a previous extraction and recreate the directory.
pub async fn reset_image_dir(image_dir: &Path) -> Result<(), ExtractionError> {
    match tokio::fs::remove_dir_all(image_dir).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(ExtractionError::io(image_dir, error)),
    }
    tokio::fs::create_dir_all(image_dir)
        .await
        .map_err(|error| ExtractionError::io(image_dir, error))
}

/// Image files directly inside `image_dir`, sorted by file name.
pub fn collect_images(image_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    if !image_dir.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(image_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|error| {
            let path = error
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| image_dir.to_path_buf());
            ExtractionError::io(path, std::io::Error::other(error.to_string()))
        })?;
        if entry.file_type().is_file() && has_extension(entry.path(), &IMAGE_EXTENSIONS) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

/// Run `extractor` over `documents` and produce ordered fragments.
///
/// The image directory is reset first, so only figures from this extraction are returned.
pub async fn extract_fragments(
    extractor: &dyn Extractor,
    documents: &[PathBuf],
    image_dir: &Path,
) -> Result<Vec<Fragment>, ExtractionError> {
    reset_image_dir(image_dir).await?;

    let mut fragments = Vec::new();
    for document in documents {
        let elements = extractor.partition(document, image_dir).await?;
        tracing::debug!(
            document = %document.display(),
            elements = elements.len(),
            "Partitioned document"
        );
        fragments.extend(elements.into_iter().filter_map(classify_element));
    }

    let images = collect_images(image_dir)?;
    let image_count = images.len();
    fragments.extend(images.into_iter().map(Fragment::Image));

    tracing::info!(
        fragments = fragments.len(),
        images = image_count,
        "Extracted fragments"
    );
    Ok(fragments)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
}
