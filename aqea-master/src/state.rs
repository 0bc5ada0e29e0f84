//! Shared application state (spec §4.1), grounded on the teacher's
//! `AppState` — one `Arc<dyn Store>` instead of the teacher's engine/
//! evidence/recipes bundle, since coordination here lives entirely in
//! the store backend rather than in-process collections.

use std::sync::Arc;

use aqea_store::Store;

use crate::api::UnitErrorLog;
use crate::config::MasterConfig;
use crate::metrics::MasterMetrics;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub metrics: MasterMetrics,
    pub config: MasterConfig,
    pub unit_errors: UnitErrorLog,
}
