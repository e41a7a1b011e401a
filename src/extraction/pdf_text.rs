//! Offline extractor: plain text via `pdf-extract`, split into composite elements.
//!
//! No tables or figures are recognised; any images already sitting in the image directory are
//! still picked up by the shared collection step.

use super::{Element, ExtractionError, Extractor};
use async_trait::async_trait;
use semchunk_rs::Chunker;
use std::path::Path;

const COMPOSITE_CATEGORY: &str = "CompositeElement";

/// Local PDF text extractor.
pub struct PdfTextExtractor {
    max_characters: usize,
}

impl PdfTextExtractor {
    /// Extractor producing elements of at most `max_characters` characters.
    pub fn new(max_characters: usize) -> Self {
        Self {
            max_characters: max_characters.max(1),
        }
    }
}

/// Split extracted text into composite elements bounded by `max_characters`.
pub(crate) fn split_composites(text: &str, max_characters: usize) -> Vec<Element> {
    let chunker = Chunker::new(
        max_characters,
        Box::new(|segment: &str| segment.chars().count()),
    );
    chunker
        .chunk(text)
        .iter()
        .flat_map(|chunk| enforce_bound(chunk, max_characters))
        .map(|chunk| Element::new(COMPOSITE_CATEGORY, chunk))
        .collect()
}

/// The chunker can overshoot by the separators it rejoins, so oversized chunks are cut again,
/// at the last whitespace inside the bound when there is one.
fn enforce_bound(chunk: &str, max_characters: usize) -> Vec<String> {
    let max_characters = max_characters.max(1);
    let mut pieces = Vec::new();
    let mut rest = chunk.trim();
    while let Some((limit, _)) = rest.char_indices().nth(max_characters) {
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&index| index > 0)
            .unwrap_or(limit);
        pieces.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

#[async_trait]
impl Extractor for PdfTextExtractor {
    async fn partition(
        &self,
        document: &Path,
        _image_dir: &Path,
    ) -> Result<Vec<Element>, ExtractionError> {
        let bytes = tokio::fs::read(document)
            .await
            .map_err(|error| ExtractionError::io(document, error))?;

        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExtractionError::Pdf(format!("Task join error: {e}")))?
        .map_err(ExtractionError::Pdf)?;

        let elements = split_composites(&text, self.max_characters);
        tracing::debug!(
            document = %document.display(),
            characters = text.len(),
            elements = elements.len(),
            "Extracted PDF text"
        );
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn composites_respect_character_bound() {
        let text = "Solar cells convert light. ".repeat(40);
        let elements = split_composites(&text, 120);

        assert!(elements.len() > 1);
        assert!(elements.iter().all(|element| element.category == "CompositeElement"));
        assert!(elements.iter().all(|element| element.text.chars().count() <= 120));
    }

    #[test]
    fn unbroken_text_is_cut_at_the_bound() {
        let pieces = enforce_bound(&"é".repeat(25), 10);

        assert_eq!(
            pieces.iter().map(|piece| piece.chars().count()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
    }

    #[test]
    fn blank_text_yields_no_elements() {
        assert!(split_composites("   \n\n  ", 100).is_empty());
    }

    #[tokio::test]
    async fn invalid_pdf_is_reported() {
        let dir = tempdir().expect("tempdir");
        let document = dir.path().join("broken.pdf");
        tokio::fs::write(&document, b"not a pdf").await.expect("write");

        let error = PdfTextExtractor::new(4000)
            .partition(&document, dir.path())
            .await
            .expect_err("invalid pdf");
        assert!(matches!(error, ExtractionError::Pdf(_)));
    }
}
