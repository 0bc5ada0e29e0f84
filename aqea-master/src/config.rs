//! Master configuration from environment variables.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub sqlite_fallback_path: Option<String>,
    pub ndjson_fallback_dir: String,
    pub heartbeat_timeout_secs: i64,
    pub sweep_interval_secs: u64,
    pub default_max_retries: u32,
    pub source_name: String,
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            sqlite_fallback_path: std::env::var("SQLITE_FALLBACK_PATH").ok(),
            ndjson_fallback_dir: std::env::var("NDJSON_FALLBACK_DIR")
                .unwrap_or_else(|_| "extracted_data".to_string()),
            heartbeat_timeout_secs: std::env::var("HEARTBEAT_TIMEOUT_SECS")
                .unwrap_or_else(|_| aqea_core::model::HEARTBEAT_TIMEOUT_SECS.to_string())
                .parse()
                .context("Invalid HEARTBEAT_TIMEOUT_SECS")?,
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid SWEEP_INTERVAL_SECS")?,
            default_max_retries: std::env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid MAX_RETRIES")?,
            source_name: std::env::var("SOURCE_NAME").unwrap_or_else(|_| "wiktionary".to_string()),
        })
    }
}
