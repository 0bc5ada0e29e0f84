//! aqea-master binary — distributed work coordinator for the AQEA
//! lexical extraction pipeline.

mod api;
mod config;
mod metrics;
mod planner;
mod state;
mod sweep;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aqea_store::CoordinationStore;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use api::UnitErrorLog;
use config::MasterConfig;
use metrics::MasterMetrics;
use state::AppState;

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

    let config = match MasterConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: MasterConfig) -> i32 {
    info!("starting aqea-master on {}", config.bind_addr);

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

    if let Ok(plans_path) = std::env::var("LANGUAGE_PLANS_PATH") {
        match load_language_plans(&plans_path) {
            Ok(plans) => {
                if let Some(unknown) = plans
                    .iter()
                    .map(|plan| plan.language_code.as_str())
                    .find(|code| aqea_core::lang::aa_byte(code).is_none())
                {
                    error!("language plan references unsupported language code '{unknown}'");
                    return EXIT_UNSUPPORTED_LANGUAGE;
                }

                let mut units = Vec::new();
                for plan in &plans {
                    units.extend(planner::plan_work_units(&config.source_name, plan, config.default_max_retries));
                }
                info!("generated {} work unit(s) from {} language plan(s)", units.len(), plans.len());
                if let Err(e) = store.put_work_units(&units).await {
                    error!("failed to persist generated work units: {e}");
                    return EXIT_STORE_INIT_FAILED;
                }
            }
            Err(e) => warn!("could not load language plans from {plans_path}: {e}"),
        }
    } else {
        info!("LANGUAGE_PLANS_PATH not set; starting with whatever work units the store already has");
    }

    let state = Arc::new(AppState {
        store,
        metrics: MasterMetrics::new(),
        config: config.clone(),
        unit_errors: UnitErrorLog::default(),
    });

    let sweep_state = state.clone();
    tokio::spawn(async move { sweep::run(sweep_state).await });

    let app = api::router(state.clone());
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {e}", config.bind_addr);
            return EXIT_CONFIG_ERROR;
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let shutdown_flag = interrupted.clone();

    info!("aqea-master listening on {}", config.bind_addr);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_flag))
        .await;

    if let Err(e) = serve_result {
        error!("server error: {e}");
    }

    log_final_status(&state).await;

    if interrupted.load(Ordering::Relaxed) {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

fn load_language_plans(path: &str) -> anyhow::Result<Vec<aqea_core::model::LanguagePlan>> {
    let contents = std::fs::read_to_string(path)?;
    let plans = serde_json::from_str(&contents)?;
    Ok(plans)
}

/// Logs a final snapshot of work-unit and worker state before exit
/// (spec §7 "On shutdown, the master logs a final status snapshot").
async fn log_final_status(state: &Arc<AppState>) {
    match state.store.list_work_units().await {
        Ok(units) => {
            let completed = units.iter().filter(|u| u.status == aqea_core::model::WorkUnitStatus::Completed).count();
            let failed = units.iter().filter(|u| u.status == aqea_core::model::WorkUnitStatus::Failed).count();
            let total_processed: u64 = units.iter().map(|u| u.entries_processed).sum();
            info!(
                "final status: {}/{} units completed, {} failed, {} entries processed",
                completed,
                units.len(),
                failed,
                total_processed
            );
        }
        Err(e) => warn!("final status snapshot unavailable: {e}"),
    }
}

/// Waits for SIGTERM/SIGINT, grounded on the same signal-handling shape
/// the worker binary uses.
async fn wait_for_shutdown_signal(flag: Arc<AtomicBool>) {
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
    info!("shutdown signal received, draining in-flight requests");
    flag.store(true, Ordering::Relaxed);
}
