//! Error taxonomy for the config and conversion layers (spec §7).

use thiserror::Error;

/// Malformed config or unsupported language — fatal at startup (spec §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(String),
    #[error("invalid value for environment variable {name}: {source}")]
    InvalidEnv {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unsupported language code: {0}")]
    UnsupportedLanguage(String),
}

/// Per-record conversion failure — soft error, the record is skipped
/// and counted (spec §7).
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("lemma is empty")]
    EmptyLemma,
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("address space exhausted for (AA={aa:#04X}, QQ={qq:#04X}, EE={ee:#04X})")]
    AddressSpaceExhausted { aa: u8, qq: u8, ee: u8 },
    #[error("allocator error: {0}")]
    Allocator(String),
}
