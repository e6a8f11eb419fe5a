use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::line::{SequenceBoard, SequenceView};
use crate::state::AppState;
use crate::topics::SEQUENCES_RESOURCE;

/// Cache key of the full board.
pub const BOARD_CACHE_KEY: &str = "sequences:all";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sequences", get(get_board).post(create_sequence))
        .route("/api/sequences/:id/park", patch(park_sequence))
}

#[derive(Serialize)]
struct BoardResponse {
    success: bool,
    data: SequenceBoard,
}

#[derive(Serialize)]
struct SequenceResponse {
    success: bool,
    data: SequenceView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CreateSequenceRequest {
    pub ftype_battery: String,
    pub fmodel_battery: String,
}

async fn get_board(State(state): State<AppState>) -> Result<Json<BoardResponse>> {
    let line = state.line.clone();
    let board = state
        .cache
        .get_or_compute_default(BOARD_CACHE_KEY, move || async move { line.sequence_board() })
        .await?;

    Ok(Json(BoardResponse {
        success: true,
        data: board,
    }))
}

async fn create_sequence(
    State(state): State<AppState>,
    Json(request): Json<CreateSequenceRequest>,
) -> Result<(StatusCode, Json<SequenceResponse>)> {
    if request.ftype_battery.trim().is_empty() || request.fmodel_battery.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "FTYPE_BATTERY and FMODEL_BATTERY are required".to_string(),
        ));
    }

    let row = state
        .line
        .create_sequence(request.ftype_battery.trim(), request.fmodel_battery.trim())?;
    state.cache.invalidate_resource(SEQUENCES_RESOURCE).await;
    tracing::info!(fid = row.fid, model = %row.fmodel_battery, "sequence created");

    Ok((
        StatusCode::CREATED,
        Json(SequenceResponse {
            success: true,
            data: SequenceView::from(&row),
        }),
    ))
}

async fn park_sequence(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<SequenceResponse>> {
    let row = state
        .line
        .park_sequence(id)?
        .ok_or_else(|| ServerError::NotFound(format!("sequence {}", id)))?;
    state.cache.invalidate_resource(SEQUENCES_RESOURCE).await;
    tracing::info!(fid = row.fid, "sequence parked");

    Ok(Json(SequenceResponse {
        success: true,
        data: SequenceView::from(&row),
    }))
}
