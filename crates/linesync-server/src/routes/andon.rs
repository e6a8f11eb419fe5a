use axum::{
    extract::{Path, State},
    routing::{get, patch, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, ServerError};
use crate::line::{AndonCall, AndonSummary};
use crate::state::AppState;

/// Cache resource of REST andon reads.
pub const ANDON_RESOURCE: &str = "andon";

const CALLS_CACHE_KEY: &str = "andon:calls";
const SUMMARY_CACHE_KEY: &str = "andon:summary";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/andon/calls", get(list_calls))
        .route("/api/andon/calls/:station", patch(set_call))
        .route("/api/andon/summary", get(get_summary))
        .route("/api/andon/summary/:name", put(set_kpi))
}

#[derive(Debug, Deserialize)]
pub struct SetCallRequest {
    pub call_type: String,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetKpiRequest {
    pub value: f64,
}

#[derive(Serialize)]
struct CallsResponse {
    success: bool,
    data: Vec<AndonCall>,
}

#[derive(Serialize)]
struct SummaryResponse {
    success: bool,
    data: AndonSummary,
}

/// KPI names the summary understands.
const KPI_NAMES: &[&str] = &["TARGET", "PLAN", "ACT_CKD", "ACT_ASSY", "EFF", "TAKTIME"];

async fn list_calls(State(state): State<AppState>) -> Result<Json<CallsResponse>> {
    let line = state.line.clone();
    let calls = state
        .cache
        .get_or_compute_default(CALLS_CACHE_KEY, move || async move { line.active_calls() })
        .await?;

    Ok(Json(CallsResponse {
        success: true,
        data: calls,
    }))
}

async fn set_call(
    State(state): State<AppState>,
    Path(station): Path<String>,
    Json(request): Json<SetCallRequest>,
) -> Result<Json<Value>> {
    if request.call_type.trim().is_empty() {
        return Err(ServerError::InvalidRequest("call_type is required".to_string()));
    }

    let row = state
        .line
        .set_call(&station, request.call_type.trim(), request.active)?;
    state.cache.invalidate_resource(ANDON_RESOURCE).await;
    tracing::info!(station = %row.station, call_type = %row.call_type, active = request.active, "andon call updated");

    Ok(Json(json!({
        "success": true,
        "data": {
            "station": row.station,
            "call_type": row.call_type,
            "active": row.fvalue == 1,
        }
    })))
}

async fn get_summary(State(state): State<AppState>) -> Result<Json<SummaryResponse>> {
    let line = state.line.clone();
    let summary = state
        .cache
        .get_or_compute_default(SUMMARY_CACHE_KEY, move || async move { line.summary() })
        .await?;

    Ok(Json(SummaryResponse {
        success: true,
        data: summary,
    }))
}

async fn set_kpi(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SetKpiRequest>,
) -> Result<Json<SummaryResponse>> {
    let name = name.to_uppercase();
    if !KPI_NAMES.contains(&name.as_str()) {
        return Err(ServerError::NotFound(format!("KPI {}", name)));
    }

    state.line.set_global(&name, request.value)?;
    state.cache.invalidate_resource(ANDON_RESOURCE).await;

    Ok(Json(SummaryResponse {
        success: true,
        data: state.line.summary()?,
    }))
}
