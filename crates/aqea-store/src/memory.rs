//! In-memory store with an optional NDJSON file fallback (spec §4.5,
//! §9 OQ4). Used for tests and for the no-database "HTTP-only" mode:
//! the master and worker still talk `/api/*` as normal, they just keep
//! state in process memory instead of a database, appending entries to
//! an NDJSON file so a restart doesn't lose completed work.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use aqea_core::convert::AddressAllocator;
use aqea_core::error::ConversionError;
use aqea_core::{Address, AqeaEntry, WorkUnit, WorkUnitStatus, WorkerRecord, WorkerStatus};

use crate::coordination::CoordinationStore;
use crate::entry::EntryStore;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    entries: HashMap<Address, AqeaEntry>,
    work_units: HashMap<String, WorkUnit>,
    workers: HashMap<String, WorkerRecord>,
    /// `(aa, qq, ee) -> next free a2` (spec §4.4).
    next_a2: HashMap<(u8, u8, u8), u8>,
    /// `(aa, qq, ee, lemma_key) -> a2`, makes allocation idempotent.
    allocated: HashMap<(u8, u8, u8, String), u8>,
}

/// In-memory backend. If `fallback_path` is set, every upserted entry
/// is also appended as a JSON line so the data survives a restart
/// (grounded on the teacher's evidence-store run-directory pattern,
/// simplified from Parquet batches to one file per line).
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fallback_path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fallback_path: None,
        }
    }

    /// Create a store that appends completed entries to `path` as
    /// newline-delimited JSON, creating parent directories as needed.
    pub fn with_fallback_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Touch the file so callers can rely on it existing immediately.
        OpenOptions::new().create(true).append(true).open(&path)?;
        info!("NDJSON fallback file ready at {:?}", path);
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            fallback_path: Some(path),
        })
    }

    fn append_fallback(&self, entry: &AqeaEntry) -> Result<(), StoreError> {
        let Some(path) = &self.fallback_path else {
            return Ok(());
        };
        let mut file: File = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| StoreError::Persistent(format!("serializing entry for fallback file: {e}")))?;
        writeln!(file, "{line}").map_err(StoreError::from)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for InMemoryStore {
    async fn upsert_entry(&self, entry: &AqeaEntry) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.entries.insert(entry.address, entry.clone());
        }
        self.append_fallback(entry)
    }

    async fn get_entry(&self, address: &Address) -> Result<Option<AqeaEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().entries.get(address).cloned())
    }

    async fn find_by_lemma(&self, language_code: &str, lemma: &str) -> Result<Vec<AqeaEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .values()
            .filter(|e| e.meta.lemma == lemma && e.address.aa == aqea_core::lang::aa_byte(language_code).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn count_entries(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().entries.len() as u64)
    }
}

#[async_trait]
impl AddressAllocator for InMemoryStore {
    async fn allocate(&self, aa: u8, qq: u8, ee: u8, lemma_key: &str) -> Result<u8, ConversionError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (aa, qq, ee, lemma_key.to_string());
        if let Some(a2) = inner.allocated.get(&key) {
            return Ok(*a2);
        }
        let slot = inner.next_a2.entry((aa, qq, ee)).or_insert(0x01);
        if *slot > 0xFE {
            return Err(ConversionError::AddressSpaceExhausted { aa, qq, ee });
        }
        let a2 = *slot;
        *slot += 1;
        inner.allocated.insert(key, a2);
        Ok(a2)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn put_work_units(&self, units: &[WorkUnit]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for unit in units {
            inner.work_units.entry(unit.work_id.clone()).or_insert_with(|| unit.clone());
        }
        Ok(())
    }

    async fn list_work_units(&self) -> Result<Vec<WorkUnit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut units: Vec<_> = inner.work_units.values().cloned().collect();
        units.sort_by(|a, b| a.work_id.cmp(&b.work_id));
        Ok(units)
    }

    async fn claim_work_unit(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<WorkUnit>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut candidates: Vec<&mut WorkUnit> = inner
            .work_units
            .values_mut()
            .filter(|u| u.status == WorkUnitStatus::Pending)
            .collect();
        candidates.sort_by(|a, b| a.work_id.cmp(&b.work_id));
        let Some(unit) = candidates.into_iter().next() else {
            return Ok(None);
        };
        unit.status = WorkUnitStatus::Assigned;
        unit.assigned_worker = Some(worker_id.to_string());
        unit.assigned_at = Some(now);
        Ok(Some(unit.clone()))
    }

    async fn report_progress(
        &self,
        work_id: &str,
        worker_id: &str,
        entries_processed: u64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let unit = inner
            .work_units
            .get_mut(work_id)
            .ok_or_else(|| StoreError::WorkUnitNotFound(work_id.to_string()))?;
        if unit.assigned_worker.as_deref() != Some(worker_id) {
            return Err(StoreError::NotOwner(work_id.to_string(), worker_id.to_string()));
        }
        if unit.status == WorkUnitStatus::Assigned {
            unit.status = WorkUnitStatus::Processing;
            unit.started_at = Some(now);
        }
        unit.entries_processed = entries_processed;
        Ok(())
    }

    async fn complete_work_unit(&self, work_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let unit = inner
            .work_units
            .get_mut(work_id)
            .ok_or_else(|| StoreError::WorkUnitNotFound(work_id.to_string()))?;
        if unit.assigned_worker.as_deref() != Some(worker_id) {
            return Err(StoreError::NotOwner(work_id.to_string(), worker_id.to_string()));
        }
        unit.status = WorkUnitStatus::Completed;
        unit.completed_at = Some(now);
        Ok(())
    }

    async fn fail_work_unit(
        &self,
        work_id: &str,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let unit = inner
            .work_units
            .get_mut(work_id)
            .ok_or_else(|| StoreError::WorkUnitNotFound(work_id.to_string()))?;
        if unit.assigned_worker.as_deref() != Some(worker_id) {
            return Err(StoreError::NotOwner(work_id.to_string(), worker_id.to_string()));
        }
        unit.retry_count += 1;
        unit.last_error = Some(error.to_string());
        if unit.retry_count >= unit.max_retries {
            unit.status = WorkUnitStatus::Failed;
            unit.completed_at = Some(now);
        } else {
            unit.status = WorkUnitStatus::Pending;
            unit.assigned_worker = None;
            unit.assigned_at = None;
        }
        Ok(())
    }

    async fn sweep_stale_units(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<Vec<WorkUnit>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { work_units, workers, .. } = &mut *inner;
        let mut reclaimed = Vec::new();
        for unit in work_units.values_mut() {
            // Reassignment is conditioned on the *owning worker's*
            // heartbeat, not the unit's own claim age (spec §3, §4.1): a
            // worker still heartbeating but slow to finish a large unit
            // must keep it.
            let owner_offline = unit
                .assigned_worker
                .as_ref()
                .map(|worker_id| {
                    workers
                        .get(worker_id)
                        .map(|w| w.is_stale(now, timeout_secs))
                        .unwrap_or(true)
                })
                .unwrap_or(false);
            let stale = matches!(unit.status, WorkUnitStatus::Assigned | WorkUnitStatus::Processing) && owner_offline;
            if !stale {
                continue;
            }
            unit.retry_count += 1;
            if unit.retry_count >= unit.max_retries {
                unit.status = WorkUnitStatus::Failed;
                unit.completed_at = Some(now);
                warn!("work unit {} failed after exceeding retry budget", unit.work_id);
            } else {
                unit.status = WorkUnitStatus::Pending;
                unit.assigned_worker = None;
                unit.assigned_at = None;
                info!("reclaimed stale work unit {}", unit.work_id);
            }
            reclaimed.push(unit.clone());
        }
        Ok(reclaimed)
    }

    async fn upsert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError> {
        self.inner.lock().unwrap().workers.insert(worker.worker_id.clone(), worker.clone());
        Ok(())
    }

    async fn touch_worker_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.last_heartbeat = now;
        }
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut workers: Vec<_> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    async fn mark_stale_workers_offline(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for worker in inner.workers.values_mut() {
            if worker.status != WorkerStatus::Offline && worker.is_stale(now, timeout_secs) {
                worker.status = WorkerStatus::Offline;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqea_core::EntryMeta;

    fn sample_entry(a2: u8) -> AqeaEntry {
        let now = Utc::now();
        AqeaEntry {
            address: Address::new(0xA0, 0x01, 0x10, a2),
            label: "Apfel".to_string(),
            description: "German noun 'Apfel'.".to_string(),
            domain: "0xA0".to_string(),
            meta: EntryMeta {
                lemma: "Apfel".to_string(),
                pos: "noun".to_string(),
                ipa: None,
                definitions: vec!["a round fruit".to_string()],
                examples: vec![],
                synonyms: vec![],
                antonyms: vec![],
                translations: vec![],
                audio: vec![],
                frequency_rank: Some(500),
                source: "wiktionary".to_string(),
                worker_id: "worker-1".to_string(),
                created_at: now,
            },
            relations: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn allocator_is_idempotent_per_lemma_key() {
        let store = InMemoryStore::new();
        let a2_a = store.allocate(0xA0, 0x01, 0x10, "deu::noun::apfel").await.unwrap();
        let a2_b = store.allocate(0xA0, 0x01, 0x10, "deu::noun::apfel").await.unwrap();
        assert_eq!(a2_a, a2_b);
    }

    #[tokio::test]
    async fn allocator_gives_distinct_ids_to_distinct_lemmas() {
        let store = InMemoryStore::new();
        let a2_a = store.allocate(0xA0, 0x01, 0x10, "deu::noun::apfel").await.unwrap();
        let a2_b = store.allocate(0xA0, 0x01, 0x10, "deu::noun::birne").await.unwrap();
        assert_ne!(a2_a, a2_b);
    }

    #[tokio::test]
    async fn allocator_reports_exhaustion() {
        let store = InMemoryStore::new();
        for i in 0..254u32 {
            store.allocate(0xA0, 0x01, 0x10, &format!("lemma-{i}")).await.unwrap();
        }
        let err = store.allocate(0xA0, 0x01, 0x10, "one-too-many").await.unwrap_err();
        assert!(matches!(err, ConversionError::AddressSpaceExhausted { .. }));
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = InMemoryStore::new();
        let entry = sample_entry(0x05);
        store.upsert_entry(&entry).await.unwrap();
        let fetched = store.get_entry(&entry.address).await.unwrap().unwrap();
        assert_eq!(fetched.label, "Apfel");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_address() {
        let store = InMemoryStore::new();
        let entry = sample_entry(0x05);
        store.upsert_entry(&entry).await.unwrap();
        store.upsert_entry(&entry).await.unwrap();
        assert_eq!(store.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fallback_file_receives_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.ndjson");
        let store = InMemoryStore::with_fallback_file(&path).unwrap();
        store.upsert_entry(&sample_entry(0x01)).await.unwrap();
        store.upsert_entry(&sample_entry(0x02)).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn claim_assigns_exactly_one_worker() {
        let store = InMemoryStore::new();
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 100);
        store.put_work_units(&[unit]).await.unwrap();

        let now = Utc::now();
        let claimed = store.claim_work_unit("worker-1", now).await.unwrap().unwrap();
        assert_eq!(claimed.assigned_worker.as_deref(), Some("worker-1"));

        let none_left = store.claim_work_unit("worker-2", now).await.unwrap();
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn progress_report_rejects_wrong_owner() {
        let store = InMemoryStore::new();
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 100);
        store.put_work_units(&[unit]).await.unwrap();
        let now = Utc::now();
        store.claim_work_unit("worker-1", now).await.unwrap();

        let err = store
            .report_progress("wiktionary_eng_00", "worker-2", 5, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotOwner(_, _)));
    }

    #[tokio::test]
    async fn sweep_reclaims_units_past_timeout() {
        let store = InMemoryStore::new();
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 100);
        store.put_work_units(&[unit]).await.unwrap();

        let assigned_at = Utc::now() - chrono::Duration::seconds(300);
        store.claim_work_unit("worker-1", assigned_at).await.unwrap();

        let reclaimed = store.sweep_stale_units(120, Utc::now()).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, WorkUnitStatus::Pending);
    }

    #[tokio::test]
    async fn sweep_spares_units_whose_worker_is_still_heartbeating() {
        let store = InMemoryStore::new();
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 100);
        store.put_work_units(&[unit]).await.unwrap();

        let assigned_at = Utc::now() - chrono::Duration::seconds(300);
        store.claim_work_unit("worker-1", assigned_at).await.unwrap();

        let now = Utc::now();
        store
            .upsert_worker(&WorkerRecord {
                worker_id: "worker-1".to_string(),
                status: WorkerStatus::Working,
                current_work_id: Some("wiktionary_eng_00".to_string()),
                last_heartbeat: now,
                total_processed: 0,
                average_rate_per_minute: 0.0,
                registered_at: assigned_at,
            })
            .await
            .unwrap();

        let reclaimed = store.sweep_stale_units(120, now).await.unwrap();
        assert!(reclaimed.is_empty(), "unit was reclaimed despite its worker actively heartbeating");

        let units = store.list_work_units().await.unwrap();
        assert_eq!(units[0].status, WorkUnitStatus::Assigned);
        assert_eq!(units[0].assigned_worker.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn sweep_fails_unit_once_retry_budget_exhausted() {
        let store = InMemoryStore::new();
        let mut unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 100);
        unit.retry_count = 2;
        unit.max_retries = 3;
        store.put_work_units(&[unit]).await.unwrap();

        let assigned_at = Utc::now() - chrono::Duration::seconds(300);
        store.claim_work_unit("worker-1", assigned_at).await.unwrap();

        let reclaimed = store.sweep_stale_units(120, Utc::now()).await.unwrap();
        assert_eq!(reclaimed[0].status, WorkUnitStatus::Failed);
    }
}
