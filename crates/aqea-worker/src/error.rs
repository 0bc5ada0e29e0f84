//! Errors from talking to the master (spec §4.1, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("transient master error: {0}")]
    Transient(String),
    #[error("master rejected request: ownership conflict")]
    Conflict,
    #[error("master store layer unavailable (503)")]
    ServiceUnavailable,
    #[error("malformed response from master: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for MasterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            MasterError::Transient(e.to_string())
        } else {
            MasterError::Malformed(e.to_string())
        }
    }
}
