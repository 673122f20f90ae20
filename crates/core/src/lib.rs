pub mod config;
pub mod entity;
pub mod record;

pub use config::{
    AppConfig, ConfigError, HueBand, NerConfig, NormalizerConfig, OcrConfig, ResolverConfig,
    ServerConfig,
};
pub use entity::{EntityLabel, EntityMap, RegexCandidates, Source};
pub use record::{Field, FieldRecord};
