use axum::{Json, extract::State};
use ivm_models::Contract;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::errors::{ApiError, PropagationError};
use crate::server::AppState;
use crate::services::{
    ContractToolsService, DiffReport, SimulationReport, ValidationReport,
};

#[derive(Debug, Deserialize)]
pub struct DiffRequest {
    pub from: Option<Value>,
    pub to: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub contract: Contract,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

pub async fn validate_contract(
    State(_state): State<AppState>,
    Json(contract): Json<Contract>,
) -> Result<Json<ValidationReport>, ApiError> {
    info!("API: Validating contract {}", contract.cache_key());
    Ok(Json(ContractToolsService::validate(&contract)))
}

pub async fn diff_payloads(
    State(_state): State<AppState>,
    Json(request): Json<DiffRequest>,
) -> Result<Json<DiffReport>, ApiError> {
    if request.from.is_none() && request.to.is_none() {
        return Err(ApiError::BadRequest(
            "at least one payload side is required".to_string(),
        ));
    }
    Ok(Json(ContractToolsService::diff(
        request.from.as_ref(),
        request.to.as_ref(),
    )))
}

pub async fn simulate_contract(
    State(_state): State<AppState>,
    Json(request): Json<SimulateRequest>,
) -> Result<Json<SimulationReport>, ApiError> {
    info!("API: Simulating contract {}", request.contract.cache_key());
    let report = ContractToolsService::simulate(
        &request.contract,
        request.from.as_ref(),
        request.to.as_ref(),
    )
    .map_err(|e: PropagationError| ApiError::from(e))?;
    Ok(Json(report))
}
