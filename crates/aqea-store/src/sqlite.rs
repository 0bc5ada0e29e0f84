//! SQLite-backed store (spec §4.4, §4.5), for single-node deployments
//! without a Postgres instance. WAL mode keeps readers from blocking
//! the writer. SQLite has no `FOR UPDATE SKIP LOCKED`, so the
//! allocator and claim paths serialize through `write_lock` instead of
//! relying on row locks — correct as long as there's one `SqliteStore`
//! per database file, which is the only supported topology anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use aqea_core::convert::AddressAllocator;
use aqea_core::error::ConversionError;
use aqea_core::{Address, AqeaEntry, EntryMeta, Relation, WorkUnit, WorkUnitStatus, WorkerRecord, WorkerStatus};

use crate::coordination::CoordinationStore;
use crate::entry::EntryStore;
use crate::error::StoreError;

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.ensure_schema().await?;
        info!("connected to SQLite coordination/entry store");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_entries (
                aa INTEGER NOT NULL,
                qq INTEGER NOT NULL,
                ee INTEGER NOT NULL,
                a2 INTEGER NOT NULL,
                label TEXT NOT NULL,
                description TEXT NOT NULL,
                domain TEXT NOT NULL,
                meta TEXT NOT NULL,
                relations TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (aa, qq, ee, a2)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_address_counters (
                aa INTEGER NOT NULL,
                qq INTEGER NOT NULL,
                ee INTEGER NOT NULL,
                next_a2 INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (aa, qq, ee)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_address_allocations (
                aa INTEGER NOT NULL,
                qq INTEGER NOT NULL,
                ee INTEGER NOT NULL,
                lemma_key TEXT NOT NULL,
                a2 INTEGER NOT NULL,
                PRIMARY KEY (aa, qq, ee, lemma_key)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_work_units (
                work_id TEXT PRIMARY KEY,
                language_code TEXT NOT NULL,
                source_name TEXT NOT NULL,
                range_start TEXT NOT NULL,
                range_end TEXT NOT NULL,
                estimated_entries INTEGER NOT NULL,
                status TEXT NOT NULL,
                assigned_worker TEXT,
                assigned_at TEXT,
                started_at TEXT,
                completed_at TEXT,
                entries_processed INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                last_error TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_workers (
                worker_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                current_work_id TEXT,
                last_heartbeat TEXT NOT NULL,
                total_processed INTEGER NOT NULL DEFAULT 0,
                average_rate_per_minute REAL NOT NULL DEFAULT 0,
                registered_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(FromRow)]
struct EntryRow {
    aa: i64,
    qq: i64,
    ee: i64,
    a2: i64,
    label: String,
    description: String,
    domain: String,
    meta: String,
    relations: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for AqeaEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, StoreError> {
        let meta: EntryMeta = serde_json::from_str(&row.meta)
            .map_err(|e| StoreError::Persistent(format!("decoding entry meta: {e}")))?;
        let relations: Vec<Relation> = serde_json::from_str(&row.relations)
            .map_err(|e| StoreError::Persistent(format!("decoding entry relations: {e}")))?;
        Ok(AqeaEntry {
            address: Address::new(row.aa as u8, row.qq as u8, row.ee as u8, row.a2 as u8),
            label: row.label,
            description: row.description,
            domain: row.domain,
            meta,
            relations,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn upsert_entry(&self, entry: &AqeaEntry) -> Result<(), StoreError> {
        let meta = serde_json::to_string(&entry.meta)
            .map_err(|e| StoreError::Persistent(format!("encoding entry meta: {e}")))?;
        let relations = serde_json::to_string(&entry.relations)
            .map_err(|e| StoreError::Persistent(format!("encoding entry relations: {e}")))?;

        sqlx::query(
            "INSERT INTO aqea_entries (aa, qq, ee, a2, label, description, domain, meta, relations, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (aa, qq, ee, a2) DO UPDATE SET
                label = excluded.label, description = excluded.description, domain = excluded.domain,
                meta = excluded.meta, relations = excluded.relations, updated_at = excluded.updated_at",
        )
        .bind(entry.address.aa as i64)
        .bind(entry.address.qq as i64)
        .bind(entry.address.ee as i64)
        .bind(entry.address.a2 as i64)
        .bind(&entry.label)
        .bind(&entry.description)
        .bind(&entry.domain)
        .bind(meta)
        .bind(relations)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entry(&self, address: &Address) -> Result<Option<AqeaEntry>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT aa, qq, ee, a2, label, description, domain, meta, relations, created_at, updated_at
             FROM aqea_entries WHERE aa = ? AND qq = ? AND ee = ? AND a2 = ?",
        )
        .bind(address.aa as i64)
        .bind(address.qq as i64)
        .bind(address.ee as i64)
        .bind(address.a2 as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AqeaEntry::try_from).transpose()
    }

    async fn find_by_lemma(&self, language_code: &str, lemma: &str) -> Result<Vec<AqeaEntry>, StoreError> {
        let Some(aa) = aqea_core::lang::aa_byte(language_code) else {
            return Ok(Vec::new());
        };
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT aa, qq, ee, a2, label, description, domain, meta, relations, created_at, updated_at
             FROM aqea_entries WHERE aa = ? AND json_extract(meta, '$.lemma') = ?",
        )
        .bind(aa as i64)
        .bind(lemma)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AqeaEntry::try_from).collect()
    }

    async fn count_entries(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM aqea_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }
}

#[async_trait]
impl AddressAllocator for SqliteStore {
    async fn allocate(&self, aa: u8, qq: u8, ee: u8, lemma_key: &str) -> Result<u8, ConversionError> {
        let _guard = self.write_lock.lock().await;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT a2 FROM aqea_address_allocations WHERE aa = ? AND qq = ? AND ee = ? AND lemma_key = ?",
        )
        .bind(aa as i64)
        .bind(qq as i64)
        .bind(ee as i64)
        .bind(lemma_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if let Some((a2,)) = existing {
            return Ok(a2 as u8);
        }

        sqlx::query(
            "INSERT INTO aqea_address_counters (aa, qq, ee, next_a2) VALUES (?, ?, ?, 1)
             ON CONFLICT (aa, qq, ee) DO NOTHING",
        )
        .bind(aa as i64)
        .bind(qq as i64)
        .bind(ee as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let (next_a2,): (i64,) = sqlx::query_as(
            "SELECT next_a2 FROM aqea_address_counters WHERE aa = ? AND qq = ? AND ee = ?",
        )
        .bind(aa as i64)
        .bind(qq as i64)
        .bind(ee as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if next_a2 > 0xFE {
            return Err(ConversionError::AddressSpaceExhausted { aa, qq, ee });
        }

        sqlx::query("UPDATE aqea_address_counters SET next_a2 = ? WHERE aa = ? AND qq = ? AND ee = ?")
            .bind(next_a2 + 1)
            .bind(aa as i64)
            .bind(qq as i64)
            .bind(ee as i64)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        sqlx::query(
            "INSERT INTO aqea_address_allocations (aa, qq, ee, lemma_key, a2) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(aa as i64)
        .bind(qq as i64)
        .bind(ee as i64)
        .bind(lemma_key)
        .bind(next_a2)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(next_a2 as u8)
    }
}

#[derive(FromRow)]
struct WorkUnitRow {
    work_id: String,
    language_code: String,
    source_name: String,
    range_start: String,
    range_end: String,
    estimated_entries: i64,
    status: String,
    assigned_worker: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    entries_processed: i64,
    retry_count: i64,
    max_retries: i64,
    last_error: Option<String>,
}

impl From<WorkUnitRow> for WorkUnit {
    fn from(row: WorkUnitRow) -> Self {
        WorkUnit {
            work_id: row.work_id,
            language_code: row.language_code,
            source_name: row.source_name,
            range_start: row.range_start,
            range_end: row.range_end,
            estimated_entries: row.estimated_entries as u64,
            status: WorkUnitStatus::parse(&row.status).unwrap_or(WorkUnitStatus::Pending),
            assigned_worker: row.assigned_worker,
            assigned_at: row.assigned_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            entries_processed: row.entries_processed as u64,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            last_error: row.last_error,
        }
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn put_work_units(&self, units: &[WorkUnit]) -> Result<(), StoreError> {
        for unit in units {
            sqlx::query(
                "INSERT INTO aqea_work_units
                    (work_id, language_code, source_name, range_start, range_end, estimated_entries,
                     status, entries_processed, retry_count, max_retries)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (work_id) DO NOTHING",
            )
            .bind(&unit.work_id)
            .bind(&unit.language_code)
            .bind(&unit.source_name)
            .bind(&unit.range_start)
            .bind(&unit.range_end)
            .bind(unit.estimated_entries as i64)
            .bind(unit.status.as_str())
            .bind(unit.entries_processed as i64)
            .bind(unit.retry_count as i64)
            .bind(unit.max_retries as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn list_work_units(&self) -> Result<Vec<WorkUnit>, StoreError> {
        let rows: Vec<WorkUnitRow> = sqlx::query_as(
            "SELECT work_id, language_code, source_name, range_start, range_end, estimated_entries,
                    status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                    retry_count, max_retries, last_error
             FROM aqea_work_units ORDER BY work_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WorkUnit::from).collect())
    }

    async fn claim_work_unit(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<WorkUnit>, StoreError> {
        let _guard = self.write_lock.lock().await;

        let row: Option<WorkUnitRow> = sqlx::query_as(
            "SELECT work_id, language_code, source_name, range_start, range_end, estimated_entries,
                    status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                    retry_count, max_retries, last_error
             FROM aqea_work_units WHERE status = 'pending' ORDER BY work_id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE aqea_work_units SET status = 'assigned', assigned_worker = ?, assigned_at = ?
             WHERE work_id = ?",
        )
        .bind(worker_id)
        .bind(now)
        .bind(&row.work_id)
        .execute(&self.pool)
        .await?;

        let mut unit = WorkUnit::from(row);
        unit.status = WorkUnitStatus::Assigned;
        unit.assigned_worker = Some(worker_id.to_string());
        unit.assigned_at = Some(now);
        Ok(Some(unit))
    }

    async fn report_progress(
        &self,
        work_id: &str,
        worker_id: &str,
        entries_processed: u64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aqea_work_units
             SET entries_processed = ?,
                 status = CASE WHEN status = 'assigned' THEN 'processing' ELSE status END,
                 started_at = COALESCE(started_at, ?)
             WHERE work_id = ? AND assigned_worker = ?",
        )
        .bind(entries_processed as i64)
        .bind(now)
        .bind(work_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id)
    }

    async fn complete_work_unit(&self, work_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aqea_work_units SET status = 'completed', completed_at = ?
             WHERE work_id = ? AND assigned_worker = ?",
        )
        .bind(now)
        .bind(work_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id)
    }

    async fn fail_work_unit(
        &self,
        work_id: &str,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aqea_work_units SET
                retry_count = retry_count + 1,
                last_error = ?,
                status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                assigned_worker = CASE WHEN retry_count + 1 >= max_retries THEN assigned_worker ELSE NULL END,
                assigned_at = CASE WHEN retry_count + 1 >= max_retries THEN assigned_at ELSE NULL END,
                completed_at = CASE WHEN retry_count + 1 >= max_retries THEN ? ELSE completed_at END
             WHERE work_id = ? AND assigned_worker = ?",
        )
        .bind(error)
        .bind(now)
        .bind(work_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id)
    }

    /// Reassignment is conditioned on the *owning worker's* heartbeat
    /// (spec §3, §4.1), not the unit's own `assigned_at` age: a worker
    /// still heartbeating but slow to finish one large unit must keep
    /// it. A unit whose owner has no row in `aqea_workers` at all is
    /// treated as stale too, since there's no evidence it's alive.
    async fn sweep_stale_units(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<Vec<WorkUnit>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let cutoff = now - chrono::Duration::seconds(timeout_secs);

        let stale: Vec<WorkUnitRow> = sqlx::query_as(
            "SELECT work_id, language_code, source_name, range_start, range_end, estimated_entries,
                    status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                    retry_count, max_retries, last_error
             FROM aqea_work_units
             WHERE status IN ('assigned', 'processing')
               AND NOT EXISTS (
                   SELECT 1 FROM aqea_workers w
                   WHERE w.worker_id = aqea_work_units.assigned_worker AND w.last_heartbeat >= ?
               )",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut reclaimed = Vec::new();
        for row in stale {
            let will_fail = row.retry_count + 1 >= row.max_retries;
            if will_fail {
                sqlx::query(
                    "UPDATE aqea_work_units SET status = 'failed', completed_at = ?, retry_count = retry_count + 1
                     WHERE work_id = ?",
                )
                .bind(now)
                .bind(&row.work_id)
                .execute(&self.pool)
                .await?;
            } else {
                sqlx::query(
                    "UPDATE aqea_work_units SET status = 'pending', assigned_worker = NULL, assigned_at = NULL,
                        retry_count = retry_count + 1
                     WHERE work_id = ?",
                )
                .bind(&row.work_id)
                .execute(&self.pool)
                .await?;
            }
            let mut unit = WorkUnit::from(row);
            unit.retry_count += 1;
            unit.status = if will_fail { WorkUnitStatus::Failed } else { WorkUnitStatus::Pending };
            if !will_fail {
                unit.assigned_worker = None;
                unit.assigned_at = None;
            } else {
                unit.completed_at = Some(now);
            }
            reclaimed.push(unit);
        }
        Ok(reclaimed)
    }

    async fn upsert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aqea_workers
                (worker_id, status, current_work_id, last_heartbeat, total_processed, average_rate_per_minute, registered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (worker_id) DO UPDATE SET
                status = excluded.status, current_work_id = excluded.current_work_id,
                last_heartbeat = excluded.last_heartbeat, total_processed = excluded.total_processed,
                average_rate_per_minute = excluded.average_rate_per_minute",
        )
        .bind(&worker.worker_id)
        .bind(worker.status.as_str())
        .bind(&worker.current_work_id)
        .bind(worker.last_heartbeat)
        .bind(worker.total_processed as i64)
        .bind(worker.average_rate_per_minute)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_worker_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE aqea_workers SET last_heartbeat = ? WHERE worker_id = ?")
            .bind(now)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT worker_id, status, current_work_id, last_heartbeat, total_processed, average_rate_per_minute, registered_at
             FROM aqea_workers ORDER BY worker_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkerRecord {
                    worker_id: row.try_get("worker_id")?,
                    status: WorkerStatus::parse(row.try_get::<String, _>("status")?.as_str())
                        .unwrap_or(WorkerStatus::Offline),
                    current_work_id: row.try_get("current_work_id")?,
                    last_heartbeat: row.try_get("last_heartbeat")?,
                    total_processed: row.try_get::<i64, _>("total_processed")? as u64,
                    average_rate_per_minute: row.try_get("average_rate_per_minute")?,
                    registered_at: row.try_get("registered_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn mark_stale_workers_offline(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - chrono::Duration::seconds(timeout_secs);
        let result = sqlx::query(
            "UPDATE aqea_workers SET status = 'offline' WHERE status != 'offline' AND last_heartbeat < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn ensure_owned(rows_affected: u64, work_id: &str, worker_id: &str) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotOwner(work_id.to_string(), worker_id.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqea.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let store = SqliteStore::connect(&url).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn allocate_is_idempotent_across_calls() {
        let (store, _dir) = temp_store().await;
        let a = store.allocate(0xA0, 0x01, 0x10, "deu::noun::apfel").await.unwrap();
        let b = store.allocate(0xA0, 0x01, 0x10, "deu::noun::apfel").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn claim_then_complete_round_trip() {
        let (store, _dir) = temp_store().await;
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 10);
        store.put_work_units(&[unit]).await.unwrap();

        let now = Utc::now();
        let claimed = store.claim_work_unit("worker-1", now).await.unwrap().unwrap();
        store
            .report_progress(&claimed.work_id, "worker-1", 5, now)
            .await
            .unwrap();
        store.complete_work_unit(&claimed.work_id, "worker-1", now).await.unwrap();

        let units = store.list_work_units().await.unwrap();
        assert_eq!(units[0].status, WorkUnitStatus::Completed);
    }

    #[tokio::test]
    async fn sweep_spares_units_whose_worker_is_still_heartbeating() {
        let (store, _dir) = temp_store().await;
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 10);
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
        assert!(reclaimed.is_empty());

        let units = store.list_work_units().await.unwrap();
        assert_eq!(units[0].status, WorkUnitStatus::Assigned);
    }

    #[tokio::test]
    async fn sweep_reclaims_units_whose_worker_has_no_recent_heartbeat() {
        let (store, _dir) = temp_store().await;
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "m".into(), 10);
        store.put_work_units(&[unit]).await.unwrap();

        let assigned_at = Utc::now() - chrono::Duration::seconds(300);
        store.claim_work_unit("worker-1", assigned_at).await.unwrap();

        let reclaimed = store.sweep_stale_units(120, Utc::now()).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, WorkUnitStatus::Pending);
    }
}
