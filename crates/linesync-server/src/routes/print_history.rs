use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use linesync_core::CacheKey;

use crate::error::{Result, ServerError};
use crate::line::PrintHistoryPage;
use crate::state::AppState;

/// Cache resource of print history pages.
pub const PRINT_HISTORY_RESOURCE: &str = "print_history";

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/print-history", get(get_print_history))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    data: PrintHistoryPage,
}

async fn get_print_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>> {
    let today = Utc::now().date_naive();
    let from = params.from.unwrap_or(today);
    let to = params.to.unwrap_or(from.max(today));
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    if from > to {
        return Err(ServerError::InvalidRequest(
            "'from' must not be after 'to'".to_string(),
        ));
    }
    if page == 0 {
        return Err(ServerError::InvalidRequest("'page' starts at 1".to_string()));
    }
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ServerError::InvalidRequest(format!(
            "'limit' must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let key = CacheKey::new(PRINT_HISTORY_RESOURCE)
        .param("from", from)
        .param("to", to)
        .param("page", page)
        .param("limit", limit)
        .to_string();

    let line = state.line.clone();
    let history = state
        .cache
        .get_or_compute_default(&key, move || async move {
            line.print_history(from, to, page, limit)
        })
        .await?;

    Ok(Json(HistoryResponse {
        success: true,
        data: history,
    }))
}
