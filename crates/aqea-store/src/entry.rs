//! The entry store port (spec §4.5): persists finished [`AqeaEntry`]
//! records and answers lookups by address or lemma.

use async_trait::async_trait;

use aqea_core::AqeaEntry;

use crate::error::StoreError;

/// Persists AQEA entries. Writes must be idempotent on `address` — the
/// same entry submitted twice is a no-op, not a duplicate (spec §4.5).
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert or update an entry, keyed by its address.
    async fn upsert_entry(&self, entry: &AqeaEntry) -> Result<(), StoreError>;

    /// Insert a batch of entries. Backends may implement this as a
    /// transaction; the default just upserts one at a time.
    async fn upsert_entries(&self, entries: &[AqeaEntry]) -> Result<(), StoreError> {
        for entry in entries {
            self.upsert_entry(entry).await?;
        }
        Ok(())
    }

    async fn get_entry(&self, address: &aqea_core::Address) -> Result<Option<AqeaEntry>, StoreError>;

    async fn find_by_lemma(&self, language_code: &str, lemma: &str) -> Result<Vec<AqeaEntry>, StoreError>;

    async fn count_entries(&self) -> Result<u64, StoreError>;
}
