//! Usage Endpoints
//!
//! - GET /statistics - aggregate usage snapshot
//! - GET /users - ids of every registered user
//! - GET /users/{id} - stored profile of one user

use super::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stickerstash_core::{Profile, UsageSnapshot};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    #[serde(flatten)]
    pub usage: UsageSnapshot,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub ids: Vec<u64>,
}

#[tracing::instrument(skip(state))]
pub async fn get_statistics(
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, (StatusCode, String)> {
    let usage = state.ledger.usage_snapshot().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read usage snapshot");
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    Ok(Json(StatisticsResponse {
        usage,
        generated_at: Utc::now(),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<UsersResponse>, (StatusCode, String)> {
    let ids = state.ledger.user_ids().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to list users");
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    Ok(Json(UsersResponse { ids }))
}

#[tracing::instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    match state.ledger.user_snapshot(id).await {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("User {id} not found"))),
        Err(e) => {
            tracing::warn!(owner_id = id, error = %e, "Failed to read profile");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}
