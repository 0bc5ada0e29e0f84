//! Typed errors for the extractor crate (spec §4.6, §7).

use thiserror::Error;

/// Errors a source extractor plugin can return. `RateLimited` and
/// `Transient` are retried with backoff by the worker; the rest are
/// surfaced as a failed work unit (spec §5, §7).
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("rate limited by source, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("transient extractor error: {0}")]
    Transient(String),
    #[error("lemma not found: {0}")]
    NotFound(String),
    #[error("malformed response from source: {0}")]
    MalformedResponse(String),
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("extractor configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ExtractError::Transient(e.to_string())
        } else {
            ExtractError::MalformedResponse(e.to_string())
        }
    }
}
