//! Application State
//!
//! Shared state passed to all API handlers.

use crate::observability::MetricsState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use stickerstash_core::Ledger;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub metrics_state: Option<MetricsState>,
    /// Set once the bot is polling
    pub readiness: Arc<AtomicBool>,
}
