//! aqea-extractor — the source extractor plugin boundary (C1). Ships
//! one implementation, `WiktionaryExtractor`, behind a small trait so a
//! worker never has to know which upstream it's talking to.

pub mod error;
pub mod factory;
pub mod wiktionary;

use async_trait::async_trait;
use futures::stream::BoxStream;

use aqea_core::RawRecord;

pub use error::ExtractError;
pub use wiktionary::{WiktionaryConfig, WiktionaryExtractor};

/// A source of raw lexical records over a lemma-prefix range.
///
/// Implementations stream records lazily rather than buffering a whole
/// range in memory, since ranges can span tens of thousands of lemmas
/// (spec §4.2).
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_range(
        &self,
        range_start: &str,
        range_end: &str,
    ) -> Result<BoxStream<'static, Result<RawRecord, ExtractError>>, ExtractError>;

    /// Release any held resources (connection pools, rate limiter
    /// state). Default no-op for stateless extractors.
    async fn close(&self) {}
}
