//! Heartbeat loop — posts `/api/heartbeat` to the master independently of
//! pipeline state (spec §4.2), regardless of what the work loop is doing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::master_client::{HeartbeatRequest, HeartbeatStatus, MasterClient};

/// Shared view of what to report on the next heartbeat tick. The work loop
/// updates this; it never blocks on the heartbeat task.
pub struct HeartbeatState {
    pub working: AtomicBool,
    pub current_work_id: std::sync::Mutex<Option<String>>,
}

impl HeartbeatState {
    pub fn new() -> Self {
        Self {
            working: AtomicBool::new(false),
            current_work_id: std::sync::Mutex::new(None),
        }
    }

    pub fn set_working(&self, work_id: Option<String>) {
        self.working.store(work_id.is_some(), Ordering::Relaxed);
        *self.current_work_id.lock().unwrap() = work_id;
    }
}

/// Spawns a heartbeat loop that posts to the master every `interval_secs`
/// seconds. Returns a `watch::Sender` — drop it to stop the heartbeat.
pub fn spawn_heartbeat(
    client: Arc<MasterClient>,
    worker_id: String,
    state: Arc<HeartbeatState>,
    interval_secs: u64,
) -> watch::Sender<()> {
    let (stop_tx, mut stop_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = if state.working.load(Ordering::Relaxed) {
                        HeartbeatStatus::Working
                    } else {
                        HeartbeatStatus::Idle
                    };
                    let current_work_id = state.current_work_id.lock().unwrap().clone();

                    let req = HeartbeatRequest {
                        worker_id: worker_id.clone(),
                        status,
                        current_work_id,
                    };
                    match client.heartbeat(&req).await {
                        Ok(()) => debug!("heartbeat sent for worker {worker_id}"),
                        Err(e) => warn!("heartbeat failed for worker {worker_id}: {e}"),
                    }
                }
                _ = stop_rx.changed() => {
                    debug!("heartbeat stopped for worker {worker_id}");
                    break;
                }
            }
        }
    });

    stop_tx
}
