use std::path::Path;

use autoform_core::{AppConfig, FieldRecord};
use serde::Serialize;
use tracing::{debug, warn};

use crate::entities::EntityModels;
use crate::extract::extract_fallback;
use crate::preprocess::{NormalizedImage, Normalizer, ToneMode};
use crate::recognizer::{OcrBackend, OcrOptions, TextSource};
use crate::resolve::{FieldResolver, ResolutionTrace};

/// Everything a single run produced, for callers that want more than the
/// record.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub record: FieldRecord,
    pub trace: ResolutionTrace,
    /// Raw OCR text output.
    pub ocr_text: String,
    pub tone: ToneMode,
    pub skew_deg: f32,
    /// The input could not be decoded and a blank page was recognized instead.
    pub degraded: bool,
}

/// Orchestrates: normalize → OCR → {entities, regex} → resolve.
///
/// Shared read-only across requests; every entry point returns a record.
pub struct FormPipeline<R: OcrBackend> {
    normalizer: Normalizer,
    text: TextSource<R>,
    entities: EntityModels,
    resolver: FieldResolver,
}

impl<R: OcrBackend> FormPipeline<R> {
    pub fn new(
        normalizer: Normalizer,
        text: TextSource<R>,
        entities: EntityModels,
        resolver: FieldResolver,
    ) -> Self {
        Self { normalizer, text, entities, resolver }
    }

    pub fn from_config(config: &AppConfig, backend: R, entities: EntityModels) -> Self {
        Self::new(
            Normalizer::new(config.preprocess.clone()),
            TextSource::new(backend, OcrOptions::from(&config.ocr)),
            entities,
            FieldResolver::new(config.resolver.clone()),
        )
    }

    pub fn extract_path(&self, path: &Path) -> FieldRecord {
        let image = self.normalizer.normalize_path(path);
        self.run(image).record
    }

    pub fn extract_bytes(&self, data: &[u8]) -> FieldRecord {
        self.extract_bytes_traced(data).record
    }

    pub fn extract_bytes_traced(&self, data: &[u8]) -> Extraction {
        let image = self.normalizer.normalize_bytes(data);
        self.run(image)
    }

    /// Read the file on the async runtime, then run the blocking stages.
    pub async fn extract_file(&self, path: &Path) -> FieldRecord {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.extract_bytes(&bytes),
            Err(e) => {
                warn!("Cannot read {}: {e}", path.display());
                FieldRecord::default()
            }
        }
    }

    /// Run recognition, extraction and resolution over an already
    /// normalized page.
    pub fn run(&self, image: NormalizedImage) -> Extraction {
        let ocr_text = self.text.image_to_text(&image);

        let entities = self.entities.tag_entities(&ocr_text);
        let candidates = extract_fallback(&ocr_text);
        debug!(entities = entities.len(), ?candidates, "Candidates collected");

        let (record, trace) = self.resolver.resolve_traced(&entities, &candidates);
        debug!(populated = record.populated(), ?trace, "Fields resolved");

        Extraction {
            record,
            trace,
            ocr_text,
            tone: image.tone,
            skew_deg: image.skew_deg,
            degraded: image.degraded,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
