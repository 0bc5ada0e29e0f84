//! HTTP surface (spec §4.1, §6.1), grounded on the teacher's
//! `kalla-server::main` handler shape: `State<Arc<AppState>>` extractor,
//! `Result<Json<T>, (StatusCode, String)>` as the uniform error type,
//! `Router::new().route(...)` chained with CORS + tracing layers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use aqea_core::model::{WorkUnit, WorkUnitStatus, WorkerRecord, WorkerStatus};
use aqea_store::{CoordinationStore, EntryStore, StoreError};

use crate::state::AppState;

/// Errors reported against a work unit since it was last claimed;
/// purely observational — not part of the work-unit data model (spec
/// §3), kept alongside it only so `/api/status` can show `errors[]`
/// per unit (spec §7) without the Coordination Store contract growing
/// a field the rest of the spec never names.
#[derive(Default)]
pub struct UnitErrorLog(Mutex<HashMap<String, Vec<ErrorItemView>>>);

impl UnitErrorLog {
    const MAX_PER_UNIT: usize = 50;

    pub fn record(&self, work_id: &str, items: &[ErrorItem]) {
        if items.is_empty() {
            return;
        }
        let mut log = self.0.lock().unwrap();
        let entry = log.entry(work_id.to_string()).or_default();
        entry.extend(items.iter().map(|e| ErrorItemView {
            kind: e.kind.clone(),
            detail: e.detail.clone(),
        }));
        let overflow = entry.len().saturating_sub(Self::MAX_PER_UNIT);
        if overflow > 0 {
            entry.drain(0..overflow);
        }
    }

    pub fn for_unit(&self, work_id: &str) -> Vec<ErrorItemView> {
        self.0.lock().unwrap().get(work_id).cloned().unwrap_or_default()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/work", get(claim_work))
        .route("/api/work/:work_id/progress", post(report_progress))
        .route("/api/work/:work_id/complete", post(complete_work))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn store_error_response(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::WorkUnitNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        StoreError::NotOwner(_, _) => (StatusCode::CONFLICT, e.to_string()),
        StoreError::NoWorkAvailable => (StatusCode::NO_CONTENT, e.to_string()),
        StoreError::AddressSpaceExhausted { .. } => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        StoreError::Transient(_) | StoreError::Persistent(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    capabilities: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    worker_id: String,
    assigned_at: DateTime<Utc>,
}

/// `POST /api/register` — creates the worker on first contact, or
/// refreshes an existing one's liveness without resetting its stats.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    let worker_id = req.worker_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now();

    let existing = state
        .store
        .list_workers()
        .await
        .map_err(store_error_response)?
        .into_iter()
        .find(|w| w.worker_id == worker_id);

    let record = WorkerRecord {
        worker_id: worker_id.clone(),
        status: WorkerStatus::Idle,
        current_work_id: None,
        last_heartbeat: now,
        total_processed: existing.as_ref().map(|w| w.total_processed).unwrap_or(0),
        average_rate_per_minute: existing.as_ref().map(|w| w.average_rate_per_minute).unwrap_or(0.0),
        registered_at: existing.map(|w| w.registered_at).unwrap_or(now),
    };
    state.store.upsert_worker(&record).await.map_err(store_error_response)?;
    info!("worker {worker_id} registered");

    Ok(Json(RegisterResponse {
        worker_id,
        assigned_at: now,
    }))
}

#[derive(Debug, Deserialize)]
struct WorkQuery {
    worker_id: String,
}

#[derive(Debug, Serialize)]
struct WorkUnitResponse {
    work_id: String,
    language: String,
    source: String,
    range_start: String,
    range_end: String,
    estimated_entries: u64,
}

impl From<WorkUnit> for WorkUnitResponse {
    fn from(u: WorkUnit) -> Self {
        Self {
            work_id: u.work_id,
            language: u.language_code,
            source: u.source_name,
            range_start: u.range_start,
            range_end: u.range_end,
            estimated_entries: u.estimated_entries,
        }
    }
}

/// `GET /api/work?worker_id=W` — atomic claim (spec §4.1 assignment
/// policy). 409 if the worker already owns an active unit, 204 if
/// nothing is pending.
async fn claim_work(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WorkQuery>,
) -> Result<Response, (StatusCode, String)> {
    let now = Utc::now();

    let units = state.store.list_work_units().await.map_err(store_error_response)?;
    let already_owns = units.iter().any(|u| {
        u.assigned_worker.as_deref() == Some(params.worker_id.as_str())
            && matches!(u.status, WorkUnitStatus::Assigned | WorkUnitStatus::Processing)
    });
    if already_owns {
        return Err((
            StatusCode::CONFLICT,
            format!("worker {} already owns an active unit", params.worker_id),
        ));
    }

    match state
        .store
        .claim_work_unit(&params.worker_id, now)
        .await
        .map_err(store_error_response)?
    {
        Some(unit) => {
            info!("worker {} claimed work unit {}", params.worker_id, unit.work_id);
            Ok((StatusCode::OK, Json(WorkUnitResponse::from(unit))).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorItem {
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorItemView {
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct ProgressRequest {
    worker_id: String,
    entries_processed: u64,
    #[serde(default)]
    #[allow(dead_code)]
    current_rate: f64,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

/// `POST /api/work/{work_id}/progress` (spec §4.1 "Progress update").
async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(work_id): Path<String>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let now = Utc::now();

    let previous = state
        .store
        .list_work_units()
        .await
        .map_err(store_error_response)?
        .into_iter()
        .find(|u| u.work_id == work_id)
        .map(|u| u.entries_processed)
        .unwrap_or(0);

    state
        .store
        .report_progress(&work_id, &req.worker_id, req.entries_processed, now)
        .await
        .map_err(store_error_response)?;

    state.unit_errors.record(&work_id, &req.errors);
    state.metrics.soft_errors.inc_by(req.errors.len() as u64);
    // Spec §8 progress law: sum of deltas across progress updates equals
    // the unit's final entries_processed.
    state
        .metrics
        .entries_processed
        .inc_by(req.entries_processed.saturating_sub(previous));

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    worker_id: String,
    entries_processed: u64,
    #[allow(dead_code)]
    success: bool,
}

/// `POST /api/work/{work_id}/complete` (spec §4.1 "Completion").
async fn complete_work(
    State(state): State<Arc<AppState>>,
    Path(work_id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let now = Utc::now();

    let existing = state
        .store
        .list_work_units()
        .await
        .map_err(store_error_response)?
        .into_iter()
        .find(|u| u.work_id == work_id);

    if let Some(unit) = &existing {
        if unit.status == WorkUnitStatus::Completed && unit.entries_processed != req.entries_processed {
            warn!(
                "work unit {work_id} re-completed with a different count ({} -> {}); last writer wins",
                unit.entries_processed, req.entries_processed
            );
        }
    }

    state
        .store
        .report_progress(&work_id, &req.worker_id, req.entries_processed, now)
        .await
        .map_err(store_error_response)?;
    state
        .store
        .complete_work_unit(&work_id, &req.worker_id, now)
        .await
        .map_err(store_error_response)?;

    info!(
        "work unit {work_id} completed by {} ({} entries, success={})",
        req.worker_id, req.entries_processed, req.success
    );

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HeartbeatStatusWire {
    Idle,
    Working,
    Error,
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    worker_id: String,
    status: HeartbeatStatusWire,
    #[serde(default)]
    current_work_id: Option<String>,
}

/// `POST /api/heartbeat` (spec §4.1, §4.2).
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let now = Utc::now();

    let existing = state
        .store
        .list_workers()
        .await
        .map_err(store_error_response)?
        .into_iter()
        .find(|w| w.worker_id == req.worker_id);

    let status = match req.status {
        HeartbeatStatusWire::Idle => WorkerStatus::Idle,
        HeartbeatStatusWire::Working => WorkerStatus::Working,
        HeartbeatStatusWire::Error => WorkerStatus::Error,
    };

    let record = WorkerRecord {
        worker_id: req.worker_id.clone(),
        status,
        current_work_id: req.current_work_id,
        last_heartbeat: now,
        total_processed: existing.as_ref().map(|w| w.total_processed).unwrap_or(0),
        average_rate_per_minute: existing.as_ref().map(|w| w.average_rate_per_minute).unwrap_or(0.0),
        registered_at: existing.map(|w| w.registered_at).unwrap_or(now),
    };
    if record.registered_at == now {
        warn!("heartbeat from unregistered worker {}; registering implicitly", req.worker_id);
    }
    state.store.upsert_worker(&record).await.map_err(store_error_response)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
struct WorkUnitStatusView {
    work_id: String,
    language_code: String,
    status: String,
    assigned_worker: Option<String>,
    entries_processed: u64,
    estimated_entries: u64,
    retry_count: u32,
    max_retries: u32,
    last_error: Option<String>,
    errors: Vec<ErrorItemView>,
}

#[derive(Debug, Serialize)]
struct WorkerStatusView {
    worker_id: String,
    status: String,
    current_work_id: Option<String>,
    last_heartbeat: DateTime<Utc>,
    total_processed: u64,
    average_rate_per_minute: f64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    generated_at: DateTime<Utc>,
    work_units: Vec<WorkUnitStatusView>,
    workers: Vec<WorkerStatusView>,
    soft_errors: u64,
    hard_errors: u64,
}

/// `GET /api/status` — consistent point-in-time snapshot (spec §4.1,
/// §7 "User-visible behavior").
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let now = Utc::now();
    let timeout = state.config.heartbeat_timeout_secs;

    let units = state.store.list_work_units().await.map_err(store_error_response)?;
    let work_units = units
        .into_iter()
        .map(|u| {
            let errors = state.unit_errors.for_unit(&u.work_id);
            WorkUnitStatusView {
                work_id: u.work_id,
                language_code: u.language_code,
                status: u.status.as_str().to_string(),
                assigned_worker: u.assigned_worker,
                entries_processed: u.entries_processed,
                estimated_entries: u.estimated_entries,
                retry_count: u.retry_count,
                max_retries: u.max_retries,
                last_error: u.last_error,
                errors,
            }
        })
        .collect();

    let workers = state
        .store
        .list_workers()
        .await
        .map_err(store_error_response)?
        .into_iter()
        .map(|w| {
            // A stale heartbeat always reads as offline, regardless of
            // the last status the worker itself reported (spec §3).
            let effective_status = if w.is_stale(now, timeout) {
                WorkerStatus::Offline
            } else {
                w.status
            };
            WorkerStatusView {
                worker_id: w.worker_id,
                status: effective_status.as_str().to_string(),
                current_work_id: w.current_work_id,
                last_heartbeat: w.last_heartbeat,
                total_processed: w.total_processed,
                average_rate_per_minute: w.average_rate_per_minute,
            }
        })
        .collect();

    Ok(Json(StatusResponse {
        generated_at: now,
        work_units,
        workers,
        soft_errors: state.metrics.soft_errors.get(),
        hard_errors: state.metrics.hard_errors.get(),
    }))
}

/// `GET /api/health` — 200 if the store layer answers, 503 otherwise
/// (spec §6.1).
async fn health(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.store.count_entries().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!("health check failed: store unreachable ({e})");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    let units = state.store.list_work_units().await.map_err(store_error_response)?;
    for status in [
        WorkUnitStatus::Pending,
        WorkUnitStatus::Assigned,
        WorkUnitStatus::Processing,
        WorkUnitStatus::Completed,
        WorkUnitStatus::Failed,
    ] {
        let count = units.iter().filter(|u| u.status == status).count() as i64;
        state
            .metrics
            .work_units_by_status
            .get_or_create(&crate::metrics::WorkUnitStatusLabel(status.as_str().to_string()))
            .set(count);
    }

    let now = Utc::now();
    let timeout = state.config.heartbeat_timeout_secs;
    let online = state
        .store
        .list_workers()
        .await
        .map_err(store_error_response)?
        .iter()
        .filter(|w| !w.is_stale(now, timeout))
        .count() as i64;
    state.metrics.workers_online.set(online);

    Ok(state.metrics.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use aqea_core::model::{AlphabetRange, LanguagePlan};
    use aqea_store::InMemoryStore;

    async fn test_app() -> (Arc<AppState>, Router) {
        let store: Arc<dyn aqea_store::Store> = Arc::new(InMemoryStore::new());
        let plan = LanguagePlan {
            language_code: "deu".to_string(),
            estimated_entries: 10,
            alphabet_ranges: vec![AlphabetRange {
                start_prefix: "a".to_string(),
                end_prefix: "z".to_string(),
                weight: 1.0,
            }],
        };
        let units = crate::planner::plan_work_units("wiktionary", &plan, 3);
        store.put_work_units(&units).await.unwrap();

        let state = Arc::new(AppState {
            store,
            metrics: crate::metrics::MasterMetrics::new(),
            config: crate::config::MasterConfig {
                bind_addr: "0.0.0.0:0".to_string(),
                database_url: None,
                sqlite_fallback_path: None,
                ndjson_fallback_dir: "extracted_data".to_string(),
                heartbeat_timeout_secs: 120,
                sweep_interval_secs: 30,
                default_max_retries: 3,
                source_name: "wiktionary".to_string(),
            },
            unit_errors: UnitErrorLog::default(),
        });
        let app = router(state.clone());
        (state, app)
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn claim_returns_pending_unit_then_204_once_exhausted() {
        let (_, app) = test_app().await;

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["work_id"], "wiktionary_deu_00");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn claim_rejects_worker_that_already_owns_an_active_unit() {
        let (_, app) = test_app().await;

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn progress_then_complete_round_trip() {
        let (state, app) = test_app().await;

        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let progress_body = serde_json::json!({
            "worker_id": "w1",
            "entries_processed": 3,
            "current_rate": 12.0,
            "errors": [{"kind": "empty_lemma", "detail": "skipped"}]
        });
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/work/wiktionary_deu_00/progress")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&progress_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.metrics.soft_errors.get(), 1);
        assert_eq!(state.metrics.entries_processed.get(), 3);

        let complete_body = serde_json::json!({
            "worker_id": "w1",
            "entries_processed": 5,
            "success": true
        });
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/work/wiktionary_deu_00/complete")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&complete_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let status_resp = app
            .clone()
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = json_body(status_resp).await;
        let unit = status["work_units"][0].clone();
        assert_eq!(unit["status"], "completed");
        assert_eq!(unit["entries_processed"], 5);
        assert_eq!(unit["errors"][0]["kind"], "empty_lemma");
    }

    #[tokio::test]
    async fn progress_rejects_ownership_mismatch() {
        let (_, app) = test_app().await;

        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/api/work?worker_id=w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let progress_body = serde_json::json!({
            "worker_id": "someone-else",
            "entries_processed": 1,
            "current_rate": 1.0
        });
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/work/wiktionary_deu_00/progress")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&progress_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn health_reports_ok_when_store_is_reachable() {
        let (_, app) = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
