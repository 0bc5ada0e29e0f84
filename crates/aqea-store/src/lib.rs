//! aqea-store — entry persistence, work coordination, and address
//! allocation, each with three interchangeable backends: Postgres,
//! SQLite, and an in-memory/NDJSON fallback (spec §4.4, §4.5, §9 OQ4).

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

pub mod coordination;
pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use coordination::CoordinationStore;
pub use entry::EntryStore;
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Everything a backend needs to implement to serve both the master
/// and the worker: entry persistence, work/worker coordination, and
/// address allocation.
pub trait Store: EntryStore + CoordinationStore + aqea_core::convert::AddressAllocator + Send + Sync {}

impl<T> Store for T where T: EntryStore + CoordinationStore + aqea_core::convert::AddressAllocator + Send + Sync {}

/// Backend selection, in order of preference: a configured
/// `DATABASE_URL` (Postgres or `sqlite:`), else a local SQLite file,
/// else the in-memory store with an NDJSON fallback file. Falling
/// through is logged at `warn` — it changes the durability contract
/// (spec §9 OQ4).
pub async fn connect(
    database_url: Option<&str>,
    sqlite_fallback_path: Option<&Path>,
    ndjson_fallback_path: Option<&Path>,
) -> Result<Arc<dyn Store>, StoreError> {
    if let Some(url) = database_url {
        if url.starts_with("sqlite:") {
            let store = SqliteStore::connect(url).await?;
            return Ok(Arc::new(store));
        }
        match PostgresStore::connect(url).await {
            Ok(store) => return Ok(Arc::new(store)),
            Err(e) => warn!("failed to connect to configured database ({e}), falling back"),
        }
    }

    if let Some(path) = sqlite_fallback_path {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        match SqliteStore::connect(&url).await {
            Ok(store) => return Ok(Arc::new(store)),
            Err(e) => warn!("failed to open SQLite fallback at {path:?} ({e}), falling back further"),
        }
    }

    warn!("running with the in-memory coordination/entry store — state does not survive a restart beyond the NDJSON fallback file");
    let store = match ndjson_fallback_path {
        Some(path) => InMemoryStore::with_fallback_file(path)?,
        None => InMemoryStore::new(),
    };
    Ok(Arc::new(store))
}
