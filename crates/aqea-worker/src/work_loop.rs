//! The worker's main cycle (spec §4.2): claim a unit, stream records from
//! the source extractor, convert each into an `AqeaEntry`, batch-flush to
//! the entry store, and report progress back to the master.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{info, warn};

use aqea_core::convert::{AddressAllocator, Converter};
use aqea_core::error::ConversionError;
use aqea_core::model::AqeaEntry;
use aqea_extractor::{ExtractError, Extractor};
use aqea_store::{EntryStore, Store, StoreError};

use crate::fallback::FallbackWriter;
use crate::heartbeat::HeartbeatState;
use crate::master_client::{CompleteRequest, ErrorItem, MasterClient, ProgressRequest, WorkUnitView};
use crate::metrics::{ErrorKindLabel, WorkerMetrics};

const EWMA_ALPHA: f64 = 0.3;
const BATCH_SIZE_FLOOR: usize = 10;
const MAX_INTER_BATCH_DELAY: Duration = Duration::from_secs(10);
const FLUSH_RETRY_BASE: Duration = Duration::from_millis(200);
const FLUSH_RETRY_FACTOR: f64 = 2.0;
const FLUSH_RETRY_CAP: Duration = Duration::from_secs(10);
const FLUSH_RETRY_ATTEMPTS: u32 = 5;
const POLL_BACKOFF_MIN_MS: u64 = 2_000;
const POLL_BACKOFF_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct WorkLoopConfig {
    pub worker_id: String,
    pub source_name: String,
    pub batch_size_default: usize,
    pub batch_flush_interval: Duration,
}

/// Forwards to a type-erased `Store`'s `AddressAllocator` supertrait
/// method so `Converter` (which takes `&dyn AddressAllocator`) can be
/// built from an `Arc<dyn Store>`.
struct StoreAllocator<'a>(&'a dyn Store);

#[async_trait]
impl<'a> AddressAllocator for StoreAllocator<'a> {
    async fn allocate(&self, aa: u8, qq: u8, ee: u8, lemma_key: &str) -> Result<u8, ConversionError> {
        self.0.allocate(aa, qq, ee, lemma_key).await
    }
}

/// Mutable per-unit pipeline state threaded through flush/report calls.
struct UnitProgress {
    cumulative: i64,
    rate_ewma: f64,
    last_flush: Instant,
    batch_size: usize,
    consecutive_flush_failures: u32,
    inter_batch_delay: Duration,
    pending_errors: Vec<ErrorItem>,
}

impl UnitProgress {
    fn new(batch_size_default: usize) -> Self {
        Self {
            cumulative: 0,
            rate_ewma: 0.0,
            last_flush: Instant::now(),
            batch_size: batch_size_default,
            consecutive_flush_failures: 0,
            inter_batch_delay: Duration::ZERO,
            pending_errors: Vec::new(),
        }
    }
}

/// Drives the claim→stream→convert→flush→report cycle until shutdown is
/// signaled.
pub async fn run(
    master: Arc<MasterClient>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn Store>,
    metrics: Arc<WorkerMetrics>,
    heartbeat_state: Arc<HeartbeatState>,
    fallback: Arc<FallbackWriter>,
    cfg: WorkLoopConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            info!("work loop shutting down");
            return;
        }

        match master.claim_work(&cfg.worker_id).await {
            Ok(Some(unit)) => {
                info!("claimed work unit {}", unit.work_id);
                process_unit(
                    &master,
                    extractor.as_ref(),
                    store.as_ref(),
                    &metrics,
                    &heartbeat_state,
                    &fallback,
                    &cfg,
                    unit,
                    &mut shutdown,
                )
                .await;
                heartbeat_state.set_working(None);
            }
            Ok(None) => {
                sleep_jittered(POLL_BACKOFF_MIN_MS, POLL_BACKOFF_MAX_MS, &mut shutdown).await;
            }
            Err(e) => {
                warn!("failed to claim work: {e}");
                sleep_jittered(POLL_BACKOFF_MIN_MS, POLL_BACKOFF_MAX_MS, &mut shutdown).await;
            }
        }
    }
}

async fn sleep_jittered(min_ms: u64, max_ms: u64, shutdown: &mut watch::Receiver<bool>) {
    let jitter = rand::random::<u64>() % (max_ms - min_ms + 1);
    let delay = Duration::from_millis(min_ms + jitter);
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_unit(
    master: &MasterClient,
    extractor: &dyn Extractor,
    store: &dyn Store,
    metrics: &WorkerMetrics,
    heartbeat_state: &HeartbeatState,
    fallback: &FallbackWriter,
    cfg: &WorkLoopConfig,
    unit: WorkUnitView,
    shutdown: &mut watch::Receiver<bool>,
) {
    heartbeat_state.set_working(Some(unit.work_id.clone()));

    let allocator = StoreAllocator(store);
    let converter = Converter::new(&allocator, cfg.source_name.clone(), cfg.worker_id.clone());

    let mut stream = match extractor
        .extract_range(&unit.range_start, &unit.range_end)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!("extractor rejected range for {}: {e}", unit.work_id);
            metrics.hard_errors.inc();
            return;
        }
    };

    let mut batch: Vec<AqeaEntry> = Vec::new();
    let mut progress = UnitProgress::new(cfg.batch_size_default);
    metrics.batch_size_current.set(progress.batch_size as i64);

    let mut flush_interval = tokio::time::interval(cfg.batch_flush_interval);
    flush_interval.tick().await;

    loop {
        tokio::select! {
            item = stream.next() => {
                match item {
                    Some(Ok(record)) => {
                        match converter.convert(&record).await {
                            Ok(entry) => batch.push(entry),
                            Err(e) => record_soft_error(metrics, &mut progress.pending_errors, conversion_error_kind(&e), &e.to_string()),
                        }
                        if batch.len() >= progress.batch_size {
                            flush_and_report(store, fallback, metrics, cfg, master, &unit.work_id, &mut batch, &mut progress).await;
                        }
                    }
                    Some(Err(e)) => {
                        record_soft_error(metrics, &mut progress.pending_errors, extract_error_kind(&e), &e.to_string());
                    }
                    None => {
                        if !batch.is_empty() {
                            flush_and_report(store, fallback, metrics, cfg, master, &unit.work_id, &mut batch, &mut progress).await;
                        }
                        complete_unit(master, &unit.work_id, &cfg.worker_id, progress.cumulative).await;
                        return;
                    }
                }
            }
            _ = flush_interval.tick() => {
                if !batch.is_empty() {
                    flush_and_report(store, fallback, metrics, cfg, master, &unit.work_id, &mut batch, &mut progress).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    if !batch.is_empty() {
                        flush_and_report(store, fallback, metrics, cfg, master, &unit.work_id, &mut batch, &mut progress).await;
                    }
                    // Explicit "aborting" progress update, no /complete (spec §4.2).
                    progress.pending_errors.push(ErrorItem {
                        kind: "aborting".to_string(),
                        detail: "worker shutting down".to_string(),
                    });
                    report_progress(master, &unit.work_id, &cfg.worker_id, progress.cumulative, progress.rate_ewma, &mut progress.pending_errors).await;
                    return;
                }
            }
        }
    }
}

fn record_soft_error(
    metrics: &WorkerMetrics,
    pending_errors: &mut Vec<ErrorItem>,
    kind: &'static str,
    detail: &str,
) {
    metrics
        .soft_errors
        .get_or_create(&ErrorKindLabel(kind.to_string()))
        .inc();
    pending_errors.push(ErrorItem {
        kind: kind.to_string(),
        detail: detail.to_string(),
    });
}

/// Flushes `batch` to the store (with fallback on exhausted retries),
/// updates the EWMA rate, and reports progress to the master. `batch` is
/// emptied on return regardless of outcome.
#[allow(clippy::too_many_arguments)]
async fn flush_and_report(
    store: &dyn Store,
    fallback: &FallbackWriter,
    metrics: &WorkerMetrics,
    cfg: &WorkLoopConfig,
    master: &MasterClient,
    work_id: &str,
    batch: &mut Vec<AqeaEntry>,
    progress: &mut UnitProgress,
) {
    let flushed = do_flush(store, fallback, metrics, cfg, batch, progress).await;

    let elapsed_minutes = (progress.last_flush.elapsed().as_secs_f64() / 60.0).max(1.0 / 60.0);
    progress.last_flush = Instant::now();
    let instantaneous = flushed as f64 / elapsed_minutes;
    progress.rate_ewma = EWMA_ALPHA * instantaneous + (1.0 - EWMA_ALPHA) * progress.rate_ewma;
    progress.cumulative += flushed;

    report_progress(
        master,
        work_id,
        &cfg.worker_id,
        progress.cumulative,
        progress.rate_ewma,
        &mut progress.pending_errors,
    )
    .await;
}

async fn do_flush(
    store: &dyn Store,
    fallback: &FallbackWriter,
    metrics: &WorkerMetrics,
    cfg: &WorkLoopConfig,
    batch: &mut Vec<AqeaEntry>,
    progress: &mut UnitProgress,
) -> i64 {
    let entries = std::mem::take(batch);
    if entries.is_empty() {
        return 0;
    }
    let count = entries.len() as i64;

    let mut attempt = 0;
    loop {
        match store.upsert_entries(&entries).await {
            Ok(()) => {
                metrics.entries_processed.inc_by(entries.len() as u64);
                progress.consecutive_flush_failures = 0;
                progress.batch_size = (progress.batch_size + 10).min(cfg.batch_size_default);
                progress.inter_batch_delay =
                    progress.inter_batch_delay.saturating_sub(Duration::from_millis(500));
                metrics.batch_size_current.set(progress.batch_size as i64);
                wait_inter_batch_delay(progress).await;
                return count;
            }
            Err(StoreError::Transient(msg)) => {
                attempt += 1;
                if attempt >= FLUSH_RETRY_ATTEMPTS {
                    warn!("store flush exhausted retries ({msg}), writing fallback file");
                    write_fallback(fallback, metrics, &entries).await;
                    apply_backpressure(progress);
                    metrics.batch_size_current.set(progress.batch_size as i64);
                    wait_inter_batch_delay(progress).await;
                    return count;
                }
                let delay = retry_delay(attempt);
                warn!("transient store error ({msg}), retrying in {delay:?} (attempt {attempt})");
                tokio::time::sleep(delay).await;
            }
            Err(other) => {
                warn!("persistent store error ({other}), writing fallback file");
                write_fallback(fallback, metrics, &entries).await;
                apply_backpressure(progress);
                metrics.batch_size_current.set(progress.batch_size as i64);
                wait_inter_batch_delay(progress).await;
                return count;
            }
        }
    }
}

/// Applies the backpressure ceiling computed by [`apply_backpressure`]
/// (spec §5: "increases inter-batch delay up to a ceiling") before the
/// next batch is drawn from the stream. A zero delay (the steady-state
/// case) resolves immediately.
async fn wait_inter_batch_delay(progress: &UnitProgress) {
    if !progress.inter_batch_delay.is_zero() {
        tokio::time::sleep(progress.inter_batch_delay).await;
    }
}

fn apply_backpressure(progress: &mut UnitProgress) {
    progress.consecutive_flush_failures += 1;
    progress.batch_size = (progress.batch_size / 2).max(BATCH_SIZE_FLOOR);
    progress.inter_batch_delay =
        (progress.inter_batch_delay + Duration::from_secs(1)).min(MAX_INTER_BATCH_DELAY);
}

async fn write_fallback(fallback: &FallbackWriter, metrics: &WorkerMetrics, entries: &[AqeaEntry]) {
    match fallback.write_batch(entries).await {
        Ok(path) => {
            metrics.entries_processed.inc_by(entries.len() as u64);
            metrics
                .soft_errors
                .get_or_create(&ErrorKindLabel("store_fallback".to_string()))
                .inc();
            info!("wrote {} entries to fallback file {:?}", entries.len(), path);
        }
        Err(e) => {
            metrics.hard_errors.inc();
            warn!("failed to write fallback file: {e}");
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let scaled = FLUSH_RETRY_BASE.as_secs_f64() * FLUSH_RETRY_FACTOR.powi(attempt as i32 - 1);
    Duration::from_secs_f64(scaled).min(FLUSH_RETRY_CAP)
}

async fn report_progress(
    master: &MasterClient,
    work_id: &str,
    worker_id: &str,
    entries_processed: i64,
    current_rate: f64,
    pending_errors: &mut Vec<ErrorItem>,
) {
    let errors = std::mem::take(pending_errors);
    let req = ProgressRequest {
        worker_id: worker_id.to_string(),
        entries_processed,
        current_rate,
        errors,
    };
    if let Err(e) = master.report_progress(work_id, &req).await {
        warn!("failed to report progress for {work_id}: {e}");
    }
}

async fn complete_unit(master: &MasterClient, work_id: &str, worker_id: &str, entries_processed: i64) {
    let req = CompleteRequest {
        worker_id: worker_id.to_string(),
        entries_processed,
        success: true,
    };
    if let Err(e) = master.complete(work_id, &req).await {
        warn!("failed to mark {work_id} complete: {e}");
    }
}

fn conversion_error_kind(e: &ConversionError) -> &'static str {
    match e {
        ConversionError::EmptyLemma => "empty_lemma",
        ConversionError::UnsupportedLanguage(_) => "unsupported_language",
        ConversionError::AddressSpaceExhausted { .. } => "address_space_exhausted",
        ConversionError::Allocator(_) => "allocator_error",
    }
}

fn extract_error_kind(e: &ExtractError) -> &'static str {
    match e {
        ExtractError::RateLimited { .. } => "upstream_rate_limited",
        ExtractError::Transient(_) => "upstream_transient",
        ExtractError::NotFound(_) => "upstream_not_found",
        ExtractError::MalformedResponse(_) => "upstream_malformed",
        ExtractError::UnsupportedSource(_) => "unsupported_source",
        ExtractError::Config(_) => "extractor_config",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_backpressure_halves_to_floor() {
        let mut progress = UnitProgress::new(100);
        for _ in 0..5 {
            apply_backpressure(&mut progress);
        }
        assert_eq!(progress.batch_size, BATCH_SIZE_FLOOR);
        assert_eq!(progress.inter_batch_delay, MAX_INTER_BATCH_DELAY);
    }

    #[test]
    fn conversion_error_kinds_are_stable_strings() {
        assert_eq!(conversion_error_kind(&ConversionError::EmptyLemma), "empty_lemma");
        assert_eq!(
            conversion_error_kind(&ConversionError::UnsupportedLanguage("xzy".to_string())),
            "unsupported_language"
        );
    }

    #[test]
    fn retry_delay_respects_cap() {
        assert_eq!(retry_delay(1), FLUSH_RETRY_BASE);
        assert_eq!(retry_delay(10), FLUSH_RETRY_CAP);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_inter_batch_delay_actually_waits() {
        let mut progress = UnitProgress::new(100);
        progress.inter_batch_delay = Duration::from_secs(3);

        let start = Instant::now();
        wait_inter_batch_delay(&progress).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_inter_batch_delay_is_a_noop_when_zero() {
        let progress = UnitProgress::new(100);
        let start = Instant::now();
        wait_inter_batch_delay(&progress).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
