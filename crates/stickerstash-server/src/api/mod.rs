//! HTTP API Module
//!
//! Read-only statistics API next to the bot.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `stats`: usage snapshot and per-user profiles

mod health;
mod metrics;
mod state;
mod stats;

pub use state::AppState;

use axum::{routing::get, Router};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Usage
        .route("/statistics", get(stats::get_statistics))
        .route("/users", get(stats::list_users))
        .route("/users/{id}", get(stats::get_user))
        .with_state(state)
}
