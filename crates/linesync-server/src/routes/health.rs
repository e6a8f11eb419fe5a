use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let mut topics = Map::new();
    for name in state.manager.topics() {
        let status = state
            .manager
            .poller(name)
            .map(|poller| poller.status().to_string());
        topics.insert(
            name.to_string(),
            json!({
                "members": state.manager.members(name),
                "poller": status,
            }),
        );
    }

    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "linesync-server",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.rooms.connection_count(),
        "topics": topics,
    }))
}
