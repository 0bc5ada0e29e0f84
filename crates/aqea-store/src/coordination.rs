//! The coordination store port (spec §4.1, §4.5): work-unit and worker
//! bookkeeping for the master.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aqea_core::{WorkUnit, WorkerRecord};

use crate::error::StoreError;

/// Work-unit and worker-liveness bookkeeping, shared by every master
/// instance talking to the same backend (spec §4.1).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn put_work_units(&self, units: &[WorkUnit]) -> Result<(), StoreError>;

    async fn list_work_units(&self) -> Result<Vec<WorkUnit>, StoreError>;

    /// Atomically claim one `pending` unit for `worker_id`, or `None` if
    /// none is available (spec §4.1 state machine: pending → assigned).
    async fn claim_work_unit(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<WorkUnit>, StoreError>;

    /// Mark a unit `processing` and record progress. Only the owning
    /// worker may update it (spec §4.1 single-owner invariant).
    async fn report_progress(
        &self,
        work_id: &str,
        worker_id: &str,
        entries_processed: u64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn complete_work_unit(&self, work_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn fail_work_unit(
        &self,
        work_id: &str,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Reclaim units whose owner's heartbeat is older than
    /// `timeout_secs`, resetting them to `pending` (or `failed` once
    /// `max_retries` is exceeded) (spec §3, §4.1).
    async fn sweep_stale_units(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<Vec<WorkUnit>, StoreError>;

    async fn upsert_worker(&self, worker: &WorkerRecord) -> Result<(), StoreError>;

    async fn touch_worker_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError>;

    async fn mark_stale_workers_offline(&self, timeout_secs: i64, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
