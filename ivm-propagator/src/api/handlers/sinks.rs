use std::collections::HashMap;

use axum::{Json, extract::State};
use ivm_observability::HealthCheck;

use crate::server::AppState;

/// Health of every registered sink, polled without shipping anything.
pub async fn sink_health(
    State(state): State<AppState>,
) -> Json<HashMap<String, HealthCheck>> {
    let health = state
        .sink_router
        .health_all(state.sink_health_timeout)
        .await;
    Json(health)
}
