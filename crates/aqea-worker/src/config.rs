//! Worker configuration from environment variables.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub master_url: String,
    pub source_name: String,
    pub language_code: String,
    pub wiktionary_lang: String,
    pub database_url: Option<String>,
    pub sqlite_fallback_path: Option<String>,
    pub ndjson_fallback_dir: String,
    pub metrics_port: u16,
    pub batch_size: usize,
    pub batch_flush_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub master_request_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let language_code =
            std::env::var("LANGUAGE_CODE").context("LANGUAGE_CODE required (ISO 639-3 code)")?;

        Ok(Self {
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            master_url: std::env::var("MASTER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            source_name: std::env::var("SOURCE_NAME")
                .unwrap_or_else(|_| "wiktionary".to_string()),
            wiktionary_lang: std::env::var("WIKTIONARY_LANG").unwrap_or_else(|_| language_code.clone()),
            language_code,
            database_url: std::env::var("DATABASE_URL").ok(),
            sqlite_fallback_path: std::env::var("SQLITE_FALLBACK_PATH").ok(),
            ndjson_fallback_dir: std::env::var("NDJSON_FALLBACK_DIR")
                .unwrap_or_else(|_| "extracted_data".to_string()),
            metrics_port: std::env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("Invalid METRICS_PORT")?,
            batch_size: std::env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid BATCH_SIZE")?,
            batch_flush_interval_secs: std::env::var("BATCH_FLUSH_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid BATCH_FLUSH_INTERVAL_SECS")?,
            heartbeat_interval_secs: std::env::var("HEARTBEAT_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid HEARTBEAT_INTERVAL_SECS")?,
            master_request_timeout_secs: std::env::var("MASTER_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid MASTER_REQUEST_TIMEOUT_SECS")?,
        })
    }
}
