use std::path::PathBuf;

use autoform_core::OcrConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::preprocess::NormalizedImage;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image encode error: {0}")]
    Encode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

/// Engine hints passed along with every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOptions {
    pub language: String,
    pub page_seg_mode: u8,
    pub data_path: Option<PathBuf>,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self::from(&OcrConfig::default())
    }
}

impl From<&OcrConfig> for OcrOptions {
    fn from(c: &OcrConfig) -> Self {
        Self {
            language: c.language.clone(),
            page_seg_mode: c.page_seg_mode,
            data_path: c.data_path.clone(),
        }
    }
}

/// Abstraction over an OCR backend.
/// Implementations receive the binarized page and return the recognized text.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image: &NormalizedImage, options: &OcrOptions) -> Result<String, OcrError>;
}

/// Text source over any backend. Engine failures come back as empty text.
pub struct TextSource<R: OcrBackend> {
    backend: R,
    options: OcrOptions,
}

impl<R: OcrBackend> TextSource<R> {
    pub fn new(backend: R, options: OcrOptions) -> Self {
        Self { backend, options }
    }

    pub fn image_to_text(&self, image: &NormalizedImage) -> String {
        match self.backend.recognize(image, &self.options) {
            Ok(text) => {
                debug!(chars = text.len(), "OCR complete");
                text
            }
            Err(e) => {
                warn!("OCR failed, continuing with empty text: {e}");
                String::new()
            }
        }
    }
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image: &NormalizedImage, options: &OcrOptions) -> Result<String, OcrError> {
        (**self).recognize(image, options)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string, for exercising the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &NormalizedImage, _options: &OcrOptions) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

/// Stand-in when no engine is compiled in. Every call reports `NotAvailable`.
pub struct UnavailableRecognizer;

impl OcrBackend for UnavailableRecognizer {
    fn recognize(&self, _image: &NormalizedImage, _options: &OcrOptions) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError, OcrOptions};
    use crate::preprocess::NormalizedImage;
    use leptess::{LepTess, Variable};

    pub struct TesseractRecognizer;

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image: &NormalizedImage, options: &OcrOptions) -> Result<String, OcrError> {
            let png = image.to_png().map_err(|e| OcrError::Encode(e.to_string()))?;
            let data_path = options.data_path.as_deref().and_then(|p| p.to_str());
            let mut lt = LepTess::new(data_path, &options.language)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &options.page_seg_mode.to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}
