//! aqea-worker binary — distributed extraction worker for the AQEA
//! lexical pipeline.

mod config;
mod error;
mod fallback;
mod health;
mod heartbeat;
mod master_client;
mod metrics;
mod work_loop;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::WorkerConfig;
use fallback::FallbackWriter;
use health::HealthState;
use heartbeat::HeartbeatState;
use master_client::MasterClient;
use metrics::WorkerMetrics;

/// Exit codes per spec §6.1.
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_UNSUPPORTED_LANGUAGE: i32 = 2;
const EXIT_STORE_INIT_FAILED: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
    }

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if aqea_core::lang::aa_byte(&config.language_code).is_none() {
        error!("unsupported language code: {}", config.language_code);
        std::process::exit(EXIT_UNSUPPORTED_LANGUAGE);
    }

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: WorkerConfig) -> i32 {
    info!("starting aqea-worker {} for language {}", config.worker_id, config.language_code);

    let store = match aqea_store::connect(
        config.database_url.as_deref(),
        config.sqlite_fallback_path.as_deref().map(std::path::Path::new),
        Some(std::path::Path::new(&config.ndjson_fallback_dir)),
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            error!("store initialization failed permanently: {e}");
            return EXIT_STORE_INIT_FAILED;
        }
    };

    let extractor_cfg = aqea_extractor::factory::ExtractorConfig {
        language_code: config.language_code.clone(),
        wiktionary_lang: config.wiktionary_lang.clone(),
    };
    let extractor = match aqea_extractor::factory::build(&config.source_name, &extractor_cfg) {
        Ok(e) => Arc::<dyn aqea_extractor::Extractor>::from(e),
        Err(e) => {
            error!("extractor configuration error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let metrics = Arc::new(WorkerMetrics::new());
    let ready = Arc::new(AtomicBool::new(false));
    let health_state = Arc::new(HealthState {
        metrics: (*metrics).clone(),
        ready: ready.clone(),
    });

    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{metrics_port}");
        info!("health/metrics server listening on {addr}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, health_router).await {
                    error!("health server error: {e}");
                }
            }
            Err(e) => error!("failed to bind health server on {addr}: {e}"),
        }
    });

    let master = Arc::new(MasterClient::new(
        config.master_url.clone(),
        Duration::from_secs(config.master_request_timeout_secs),
    ));

    let worker_id = match master.register(Some(&config.worker_id)).await {
        Ok(resp) => {
            info!("registered with master as {}", resp.worker_id);
            resp.worker_id
        }
        Err(e) => {
            warn!("failed to register with master ({e}); proceeding with local worker_id");
            config.worker_id.clone()
        }
    };

    ready.store(true, std::sync::atomic::Ordering::Relaxed);

    let heartbeat_state = Arc::new(HeartbeatState::new());
    let hb_stop = heartbeat::spawn_heartbeat(
        master.clone(),
        worker_id.clone(),
        heartbeat_state.clone(),
        config.heartbeat_interval_secs,
    );

    let fallback = Arc::new(FallbackWriter::new(config.ndjson_fallback_dir.clone(), worker_id.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let interrupted = spawn_signal_handler(shutdown_tx);

    let work_loop_cfg = work_loop::WorkLoopConfig {
        worker_id: worker_id.clone(),
        source_name: config.source_name.clone(),
        batch_size_default: config.batch_size,
        batch_flush_interval: Duration::from_secs(config.batch_flush_interval_secs),
    };

    work_loop::run(
        master,
        extractor,
        store,
        metrics,
        heartbeat_state,
        fallback,
        work_loop_cfg,
        shutdown_rx,
    )
    .await;

    drop(hb_stop);

    if interrupted.load(std::sync::atomic::Ordering::Relaxed) {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

/// Spawns a task that waits for SIGTERM/SIGINT and signals `shutdown_tx`;
/// returns a flag the caller can check to distinguish interrupted exit
/// from a normal one (spec §5, §6.1).
fn spawn_signal_handler(shutdown_tx: tokio::sync::watch::Sender<bool>) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received, finishing current batch");
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        let _ = shutdown_tx.send(true);
    });

    interrupted
}
