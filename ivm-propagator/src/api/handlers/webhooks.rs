use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ivm_models::{RetryPolicy, Webhook, WebhookDelivery};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::server::AppState;

use super::outbox::LimitQuery;

const DEFAULT_DELIVERY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub event_types: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub retry_policy: Option<RetryPolicy>,
    pub circuit_failure_threshold: Option<u32>,
    pub circuit_cool_down_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CircuitResponse {
    pub webhook_id: Uuid,
    pub state: crate::webhook::CircuitState,
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<Webhook>), ApiError> {
    let mut webhook = Webhook::new(request.url, request.event_types);
    webhook.headers = request.headers;
    if let Some(policy) = request.retry_policy {
        webhook.retry_policy = policy;
    }
    // Service-level circuit defaults apply unless the request overrides them.
    webhook.circuit_failure_threshold = request
        .circuit_failure_threshold
        .unwrap_or(state.webhook_defaults.circuit_failure_threshold);
    webhook.circuit_cool_down_secs = request
        .circuit_cool_down_secs
        .unwrap_or(state.webhook_defaults.circuit_cool_down.as_secs());
    webhook
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!("API: Registering webhook for {}", webhook.url);
    state
        .webhook_storage
        .store(&webhook)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(webhook)))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
) -> Result<Json<Vec<Webhook>>, ApiError> {
    let hooks = state
        .webhook_storage
        .list()
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    Ok(Json(hooks))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Webhook>, ApiError> {
    let webhook = state
        .webhook_storage
        .get(id)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Webhook not found: {}", id))
        })?;
    Ok(Json(webhook))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("API: Deleting webhook {}", id);
    state.webhook_storage.delete(id).await.map_err(|e| match e {
        ivm_storage::StorageError::NotFound(_) => {
            ApiError::NotFound(format!("Webhook not found: {}", id))
        }
        other => ApiError::InternalServerError(other.to_string()),
    })?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookDelivery>, ApiError> {
    info!("API: Test delivery for webhook {}", id);
    let delivery = state.webhook_dispatcher.test_delivery(id).await?;
    Ok(Json(delivery))
}

pub async fn get_circuit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CircuitResponse>, ApiError> {
    let circuit = state.webhook_dispatcher.circuit_state(id).await?;
    Ok(Json(CircuitResponse {
        webhook_id: id,
        state: circuit,
    }))
}

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CircuitResponse>, ApiError> {
    info!("API: Resetting circuit for webhook {}", id);
    state.webhook_dispatcher.reset_circuit(id).await?;
    let circuit = state.webhook_dispatcher.circuit_state(id).await?;
    Ok(Json(CircuitResponse {
        webhook_id: id,
        state: circuit,
    }))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<WebhookDelivery>>, ApiError> {
    state
        .webhook_storage
        .get(id)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Webhook not found: {}", id))
        })?;
    let deliveries = state
        .delivery_storage
        .list_for_webhook(id, query.limit.unwrap_or(DEFAULT_DELIVERY_LIMIT))
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    Ok(Json(deliveries))
}
