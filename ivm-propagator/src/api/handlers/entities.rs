use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ivm_models::{ChangeSet, EntityVersion};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::errors::ApiError;
use crate::server::AppState;
use crate::services::{ContractRef, IngestOutcome};

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub version: u64,
    pub payload: Value,
    pub contract: ContractRef,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub contract_id: String,
    pub contract_version: String,
}

pub async fn ingest_version(
    State(state): State<AppState>,
    Path((tenant, entity_type, entity_key)): Path<(String, String, String)>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    info!(
        "API: Ingesting {}:{} v{}",
        tenant, entity_key, request.version
    );
    let outcome = state
        .ingest_service
        .ingest(
            &tenant,
            &entity_type,
            &entity_key,
            request.version,
            request.payload,
            &request.contract,
        )
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path((tenant, entity_type, entity_key)): Path<(String, String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<IngestOutcome>, ApiError> {
    info!("API: Deleting {}:{}", tenant, entity_key);
    let contract = ContractRef {
        id: query.contract_id,
        version: query.contract_version,
    };
    let outcome = state
        .ingest_service
        .delete(&tenant, &entity_type, &entity_key, &contract)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(outcome))
}

pub async fn get_latest_version(
    State(state): State<AppState>,
    Path((tenant, _entity_type, entity_key)): Path<(String, String, String)>,
) -> Result<Json<EntityVersion>, ApiError> {
    let entity = state
        .mutation_storage
        .get_latest(&tenant, &entity_key)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "Entity not found: {}:{}",
                tenant, entity_key
            ))
        })?;
    Ok(Json(entity))
}

pub async fn list_change_sets(
    State(state): State<AppState>,
    Path((tenant, _entity_type, entity_key)): Path<(String, String, String)>,
) -> Result<Json<Vec<ChangeSet>>, ApiError> {
    let sets = state
        .changeset_storage
        .list_for_entity(&tenant, &entity_key)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    Ok(Json(sets))
}
