//! Postgres-backed store (spec §4.4, §4.5). Schema is created on
//! connect with `CREATE TABLE IF NOT EXISTS` — there's no external
//! migration tooling in this repo, so the backend is self-provisioning
//! the way the teacher's SQLite-less Postgres setup assumed an
//! already-provisioned schema; here we bootstrap it ourselves since
//! nothing else will.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Row};
use tracing::info;

use aqea_core::convert::AddressAllocator;
use aqea_core::error::ConversionError;
use aqea_core::{Address, AqeaEntry, EntryMeta, Relation, WorkUnit, WorkUnitStatus, WorkerRecord, WorkerStatus};

use crate::coordination::CoordinationStore;
use crate::entry::EntryStore;
use crate::error::StoreError;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("connected to Postgres coordination/entry store");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_entries (
                aa SMALLINT NOT NULL,
                qq SMALLINT NOT NULL,
                ee SMALLINT NOT NULL,
                a2 SMALLINT NOT NULL,
                label TEXT NOT NULL,
                description TEXT NOT NULL,
                domain TEXT NOT NULL,
                meta JSONB NOT NULL,
                relations JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (aa, qq, ee, a2)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_address_counters (
                aa SMALLINT NOT NULL,
                qq SMALLINT NOT NULL,
                ee SMALLINT NOT NULL,
                next_a2 SMALLINT NOT NULL DEFAULT 1,
                PRIMARY KEY (aa, qq, ee)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aqea_address_allocations (
                aa SMALLINT NOT NULL,
                qq SMALLINT NOT NULL,
                ee SMALLINT NOT NULL,
                lemma_key TEXT NOT NULL,
                a2 SMALLINT NOT NULL,
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
                estimated_entries BIGINT NOT NULL,
                status TEXT NOT NULL,
                assigned_worker TEXT,
                assigned_at TIMESTAMPTZ,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                entries_processed BIGINT NOT NULL DEFAULT 0,
                retry_count INT NOT NULL DEFAULT 0,
                max_retries INT NOT NULL DEFAULT 3,
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
                last_heartbeat TIMESTAMPTZ NOT NULL,
                total_processed BIGINT NOT NULL DEFAULT 0,
                average_rate_per_minute DOUBLE PRECISION NOT NULL DEFAULT 0,
                registered_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(FromRow)]
struct EntryRow {
    aa: i16,
    qq: i16,
    ee: i16,
    a2: i16,
    label: String,
    description: String,
    domain: String,
    meta: serde_json::Value,
    relations: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for AqeaEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, StoreError> {
        let meta: EntryMeta = serde_json::from_value(row.meta)
            .map_err(|e| StoreError::Persistent(format!("decoding entry meta: {e}")))?;
        let relations: Vec<Relation> = serde_json::from_value(row.relations)
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
impl EntryStore for PostgresStore {
    async fn upsert_entry(&self, entry: &AqeaEntry) -> Result<(), StoreError> {
        let meta = serde_json::to_value(&entry.meta)
            .map_err(|e| StoreError::Persistent(format!("encoding entry meta: {e}")))?;
        let relations = serde_json::to_value(&entry.relations)
            .map_err(|e| StoreError::Persistent(format!("encoding entry relations: {e}")))?;

        sqlx::query(
            "INSERT INTO aqea_entries (aa, qq, ee, a2, label, description, domain, meta, relations, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (aa, qq, ee, a2) DO UPDATE SET
                label = $5, description = $6, domain = $7, meta = $8, relations = $9, updated_at = $11",
        )
        .bind(entry.address.aa as i16)
        .bind(entry.address.qq as i16)
        .bind(entry.address.ee as i16)
        .bind(entry.address.a2 as i16)
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
             FROM aqea_entries WHERE aa = $1 AND qq = $2 AND ee = $3 AND a2 = $4",
        )
        .bind(address.aa as i16)
        .bind(address.qq as i16)
        .bind(address.ee as i16)
        .bind(address.a2 as i16)
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
             FROM aqea_entries WHERE aa = $1 AND meta->>'lemma' = $2",
        )
        .bind(aa as i16)
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
impl AddressAllocator for PostgresStore {
    async fn allocate(&self, aa: u8, qq: u8, ee: u8, lemma_key: &str) -> Result<u8, ConversionError> {
        allocate_postgres(&self.pool, aa, qq, ee, lemma_key)
            .await
            .map_err(ConversionError::from)
    }
}

async fn allocate_postgres(pool: &PgPool, aa: u8, qq: u8, ee: u8, lemma_key: &str) -> Result<u8, StoreError> {
    let mut tx = pool.begin().await?;

    let existing: Option<(i16,)> = sqlx::query_as(
        "SELECT a2 FROM aqea_address_allocations WHERE aa = $1 AND qq = $2 AND ee = $3 AND lemma_key = $4",
    )
    .bind(aa as i16)
    .bind(qq as i16)
    .bind(ee as i16)
    .bind(lemma_key)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((a2,)) = existing {
        tx.commit().await?;
        return Ok(a2 as u8);
    }

    sqlx::query(
        "INSERT INTO aqea_address_counters (aa, qq, ee, next_a2) VALUES ($1, $2, $3, 1)
         ON CONFLICT (aa, qq, ee) DO NOTHING",
    )
    .bind(aa as i16)
    .bind(qq as i16)
    .bind(ee as i16)
    .execute(&mut *tx)
    .await?;

    let (next_a2,): (i16,) = sqlx::query_as(
        "SELECT next_a2 FROM aqea_address_counters WHERE aa = $1 AND qq = $2 AND ee = $3 FOR UPDATE",
    )
    .bind(aa as i16)
    .bind(qq as i16)
    .bind(ee as i16)
    .fetch_one(&mut *tx)
    .await?;

    if next_a2 as u32 > 0xFE {
        return Err(StoreError::AddressSpaceExhausted { aa, qq, ee });
    }

    sqlx::query("UPDATE aqea_address_counters SET next_a2 = $4 WHERE aa = $1 AND qq = $2 AND ee = $3")
        .bind(aa as i16)
        .bind(qq as i16)
        .bind(ee as i16)
        .bind(next_a2 + 1)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO aqea_address_allocations (aa, qq, ee, lemma_key, a2) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(aa as i16)
    .bind(qq as i16)
    .bind(ee as i16)
    .bind(lemma_key)
    .bind(next_a2)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(next_a2 as u8)
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
    retry_count: i32,
    max_retries: i32,
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
impl CoordinationStore for PostgresStore {
    async fn put_work_units(&self, units: &[WorkUnit]) -> Result<(), StoreError> {
        for unit in units {
            sqlx::query(
                "INSERT INTO aqea_work_units
                    (work_id, language_code, source_name, range_start, range_end, estimated_entries,
                     status, entries_processed, retry_count, max_retries)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
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
            .bind(unit.retry_count as i32)
            .bind(unit.max_retries as i32)
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
        let mut tx = self.pool.begin().await?;
        let row: Option<WorkUnitRow> = sqlx::query_as(
            "SELECT work_id, language_code, source_name, range_start, range_end, estimated_entries,
                    status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                    retry_count, max_retries, last_error
             FROM aqea_work_units
             WHERE status = 'pending'
             ORDER BY work_id
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE aqea_work_units SET status = 'assigned', assigned_worker = $2, assigned_at = $3
             WHERE work_id = $1",
        )
        .bind(&row.work_id)
        .bind(worker_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

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
             SET entries_processed = $3,
                 status = CASE WHEN status = 'assigned' THEN 'processing' ELSE status END,
                 started_at = COALESCE(started_at, $4)
             WHERE work_id = $1 AND assigned_worker = $2",
        )
        .bind(work_id)
        .bind(worker_id)
        .bind(entries_processed as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id).await
    }

    async fn complete_work_unit(&self, work_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aqea_work_units SET status = 'completed', completed_at = $3
             WHERE work_id = $1 AND assigned_worker = $2",
        )
        .bind(work_id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id).await
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
                last_error = $3,
                status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                assigned_worker = CASE WHEN retry_count + 1 >= max_retries THEN assigned_worker ELSE NULL END,
                assigned_at = CASE WHEN retry_count + 1 >= max_retries THEN assigned_at ELSE NULL END,
                completed_at = CASE WHEN retry_count + 1 >= max_retries THEN $4 ELSE completed_at END
             WHERE work_id = $1 AND assigned_worker = $2",
        )
        .bind(work_id)
        .bind(worker_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        ensure_owned(result.rows_affected(), work_id, worker_id).await
    }

    /// Reassignment is conditioned on the *owning worker's* heartbeat
    /// (spec §3, §4.1), not the unit's own `assigned_at` age: a worker
    /// still heartbeating but slow to finish one large unit must keep
    /// it. A unit whose owner has no row in `aqea_workers` at all is
    /// treated as stale too, since there's no evidence it's alive.
    async fn sweep_stale_units(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<Vec<WorkUnit>, StoreError> {
        let cutoff = now - chrono::Duration::seconds(timeout_secs);

        let reclaimed: Vec<WorkUnitRow> = sqlx::query_as(
            "UPDATE aqea_work_units SET
                status = 'pending', assigned_worker = NULL, assigned_at = NULL, retry_count = retry_count + 1
             WHERE status IN ('assigned', 'processing')
               AND retry_count + 1 < max_retries
               AND NOT EXISTS (
                   SELECT 1 FROM aqea_workers w
                   WHERE w.worker_id = aqea_work_units.assigned_worker AND w.last_heartbeat >= $1
               )
             RETURNING work_id, language_code, source_name, range_start, range_end, estimated_entries,
                       status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                       retry_count, max_retries, last_error",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let failed: Vec<WorkUnitRow> = sqlx::query_as(
            "UPDATE aqea_work_units SET
                status = 'failed', completed_at = $2, retry_count = retry_count + 1
             WHERE status IN ('assigned', 'processing')
               AND retry_count + 1 >= max_retries
               AND NOT EXISTS (
                   SELECT 1 FROM aqea_workers w
                   WHERE w.worker_id = aqea_work_units.assigned_worker AND w.last_heartbeat >= $1
               )
             RETURNING work_id, language_code, source_name, range_start, range_end, estimated_entries,
                       status, assigned_worker, assigned_at, started_at, completed_at, entries_processed,
                       retry_count, max_retries, last_error",
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(reclaimed.into_iter().chain(failed).map(WorkUnit::from).collect())
    }

    async fn upsert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aqea_workers
                (worker_id, status, current_work_id, last_heartbeat, total_processed, average_rate_per_minute, registered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (worker_id) DO UPDATE SET
                status = $2, current_work_id = $3, last_heartbeat = $4, total_processed = $5, average_rate_per_minute = $6",
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
        sqlx::query("UPDATE aqea_workers SET last_heartbeat = $2 WHERE worker_id = $1")
            .bind(worker_id)
            .bind(now)
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
            "UPDATE aqea_workers SET status = 'offline' WHERE status != 'offline' AND last_heartbeat < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn ensure_owned(rows_affected: u64, work_id: &str, worker_id: &str) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotOwner(work_id.to_string(), worker_id.to_string()))
    } else {
        Ok(())
    }
}
