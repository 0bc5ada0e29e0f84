//! Typed errors for the store crate (spec §7).

use thiserror::Error;

/// Errors a store backend can return. `Transient` is safe to retry
/// (connection blips, lock contention); `Persistent` is not (spec §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("persistent store error: {0}")]
    Persistent(String),
    #[error("work unit not found: {0}")]
    WorkUnitNotFound(String),
    #[error("work unit {0} is not assigned to worker {1}")]
    NotOwner(String, String),
    #[error("no work unit available")]
    NoWorkAvailable,
    #[error("address space exhausted for (AA={aa:#04X}, QQ={qq:#04X}, EE={ee:#04X})")]
    AddressSpaceExhausted { aa: u8, qq: u8, ee: u8 },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(e.to_string()),
            _ => StoreError::Persistent(e.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Persistent(e.to_string())
    }
}

impl From<StoreError> for aqea_core::error::ConversionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AddressSpaceExhausted { aa, qq, ee } => {
                aqea_core::error::ConversionError::AddressSpaceExhausted { aa, qq, ee }
            }
            other => aqea_core::error::ConversionError::Allocator(other.to_string()),
        }
    }
}
