mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use autoform_core::AppConfig;
use autoform_ocr::{EntityModels, FormPipeline, OcrBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "AUTOFORM_CONFIG";
const LOCAL_CONFIG: &str = "autoform.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let models = EntityModels::load(&config.ner);
    info!(
        entity_model = models.has_primary(),
        person_validator = models.has_validator(),
        "Entity models ready"
    );

    let pipeline = Arc::new(FormPipeline::from_config(&config, ocr_backend(), models));
    let app = routes::router(pipeline, config.server.max_upload_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_config() -> anyhow::Result<AppConfig> {
    let path = match std::env::var_os(CONFIG_ENV) {
        Some(p) => PathBuf::from(p),
        None if Path::new(LOCAL_CONFIG).exists() => PathBuf::from(LOCAL_CONFIG),
        None => {
            info!("No config file found, using defaults");
            return Ok(AppConfig::default());
        }
    };
    let config = AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(feature = "tesseract")]
fn ocr_backend() -> Box<dyn OcrBackend> {
    Box::new(autoform_ocr::TesseractRecognizer)
}

#[cfg(not(feature = "tesseract"))]
fn ocr_backend() -> Box<dyn OcrBackend> {
    tracing::warn!("Built without the `tesseract` feature; OCR will return empty text");
    Box::new(autoform_ocr::UnavailableRecognizer)
}
