use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use ivm_models::OutboxEntry;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::server::AppState;

const DEFAULT_LIMIT: usize = 50;
const DEFAULT_STALE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    pub limit: Option<usize>,
    /// Claim age in seconds before an entry counts as stale.
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RetryAllResponse {
    pub requeued: usize,
}

#[derive(Debug, Serialize)]
pub struct ReleaseStaleResponse {
    pub released: usize,
}

pub async fn list_recent_entries(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let entries = state
        .outbox_service
        .list_recent(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(entries))
}

pub async fn list_failed_entries(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let entries = state
        .outbox_service
        .list_failed(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(entries))
}

pub async fn list_dead_letter_entries(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let entries = state
        .outbox_service
        .list_dead_letter(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(entries))
}

pub async fn list_stale_entries(
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let timeout = Duration::from_secs(
        query.timeout.unwrap_or(DEFAULT_STALE_TIMEOUT_SECS),
    );
    let entries = state
        .outbox_service
        .list_stale(timeout, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEntry>, ApiError> {
    let entry = state.outbox_service.get(id).await?;
    Ok(Json(entry))
}

pub async fn retry_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEntry>, ApiError> {
    info!("API: Retrying outbox entry {}", id);
    state.outbox_service.retry_entry(id).await?;
    let entry = state.outbox_service.get(id).await?;
    Ok(Json(entry))
}

pub async fn retry_all_failed(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<RetryAllResponse>, ApiError> {
    info!("API: Retrying all failed outbox entries");
    let requeued = state
        .outbox_service
        .retry_all_failed(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(RetryAllResponse { requeued }))
}

pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEntry>, ApiError> {
    info!("API: Replaying dead-letter entry {}", id);
    state.outbox_service.replay_dead_letter(id).await?;
    let entry = state.outbox_service.get(id).await?;
    Ok(Json(entry))
}

pub async fn release_stale(
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<ReleaseStaleResponse>, ApiError> {
    let timeout = Duration::from_secs(
        query.timeout.unwrap_or(DEFAULT_STALE_TIMEOUT_SECS),
    );
    let released = state.outbox_service.release_stale(timeout).await?;
    Ok(Json(ReleaseStaleResponse { released }))
}
