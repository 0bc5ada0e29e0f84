//! Liveness sweep (spec §4.1 "Liveness & reassignment"): every
//! `sweep_interval_secs`, mark stale workers offline and reclaim the
//! work units they held. The actual reassignment/retry-budget logic
//! lives in the store backend (`CoordinationStore::sweep_stale_units`);
//! this loop just drives it on a timer, the same shape as the teacher's
//! `kalla-worker::reaper` tick loop retargeted from jobs to work units.

use std::sync::Arc;

use tracing::{info, warn};

use aqea_store::CoordinationStore;

use crate::state::AppState;

pub async fn run(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(state.config.sweep_interval_secs));
    loop {
        interval.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &Arc<AppState>) {
    let now = chrono::Utc::now();
    let timeout = state.config.heartbeat_timeout_secs;

    match state.store.mark_stale_workers_offline(timeout, now).await {
        Ok(0) => {}
        Ok(n) => info!("sweep: marked {n} worker(s) offline"),
        Err(e) => {
            warn!("sweep: failed to mark stale workers offline: {e}");
            state.metrics.hard_errors.inc();
        }
    }

    match state.store.sweep_stale_units(timeout, now).await {
        Ok(units) if units.is_empty() => {}
        Ok(units) => {
            for unit in &units {
                info!(
                    "sweep: reclaimed work unit {} (status now {}, retry_count={})",
                    unit.work_id,
                    unit.status.as_str(),
                    unit.retry_count
                );
                state.metrics.reassignments.inc();
            }
        }
        Err(e) => {
            warn!("sweep: failed to reclaim stale work units: {e}");
            state.metrics.hard_errors.inc();
        }
    }
}
