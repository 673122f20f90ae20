pub mod entities;
pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod resolve;

pub use entities::{EntityModels, EntitySpan, EntityTagger, MockTagger, NerError, RuleTagger};
pub use extract::{extract_fallback, FallbackExtractor};
pub use pipeline::{Extraction, FormPipeline};
pub use preprocess::{NormalizedImage, Normalizer, PreprocessError, ToneMode};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, OcrOptions, TextSource, UnavailableRecognizer};
pub use resolve::{
    validate_gpa, FieldResolver, FieldStrategy, FieldTrace, RejectReason, Rejection,
    ResolutionTrace, STRATEGIES,
};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
