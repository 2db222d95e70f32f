//! OCR backends
//!
//! Turns a spine photo into raw text plus a best-guess title/author.
//!
//! Two backends are supported, selected once at startup from
//! configuration:
//! - Tesseract (local CLI, requires installation)
//! - Hosted vision-language model (OpenAI-compatible chat API)

mod tesseract;
mod vision;

pub use tesseract::TesseractOcr;
pub use vision::VisionOcr;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{OcrConfig, OcrProviderKind};

/// Text extracted from one spine photo.
///
/// `title`/`author` are best-effort: `None` means the backend could not
/// split them out, and the caller must not clobber existing values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineText {
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR processing failed: {0}")]
    ProcessingError(String),

    #[error("OCR API error: {0}")]
    ApiError(String),

    #[error("OCR timed out after {0}s")]
    Timeout(u64),
}

/// Async trait implemented by each OCR backend.
#[async_trait]
pub trait SpineOcr: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, image_data: &[u8]) -> Result<SpineText, OcrError>;
}

/// Build the configured backend. Selection happens here, once; the rest of
/// the system only sees the trait object.
pub fn from_config(config: &OcrConfig) -> anyhow::Result<Arc<dyn SpineOcr>> {
    match config.provider {
        OcrProviderKind::Tesseract => Ok(Arc::new(TesseractOcr::new(&config.language))),
        OcrProviderKind::Vision => Ok(Arc::new(VisionOcr::new(config)?)),
    }
}

/// Split raw spine text into a title/author guess: the first non-empty
/// line is the title, any remaining lines join as the author.
pub(crate) fn split_spine_lines(text: &str) -> (Option<String>, Option<String>) {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let title = lines.first().map(|l| l.to_string());
    let author = if lines.len() > 1 {
        Some(lines[1..].join(" "))
    } else {
        None
    };
    (title, author)
}

/// Canned backend for tests.
#[cfg(test)]
pub struct MockOcr {
    pub response: SpineText,
    pub fail_with: Option<String>,
}

#[cfg(test)]
#[async_trait]
impl SpineOcr for MockOcr {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn extract(&self, _image_data: &[u8]) -> Result<SpineText, OcrError> {
        match &self.fail_with {
            Some(message) => Err(OcrError::ProcessingError(message.clone())),
            None => Ok(self.response.clone()),
        }
    }
}
