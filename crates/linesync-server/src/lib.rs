//! LineSync server - realtime production-line dashboard backend
//!
//! This crate wires `linesync-core` into a deployable service with:
//! - The five dashboard topics over the embedded line store
//! - A WebSocket endpoint for topic subscriptions
//! - Cache-aside REST reads and mutations that invalidate them
//! - Health and Prometheus metrics endpoints

pub mod config;
pub mod error;
pub mod line;
pub mod routes;
pub mod state;
pub mod topics;
pub mod ws;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and metrics
        .merge(routes::health::routes())
        .merge(routes::metrics::routes())
        // REST API
        .merge(routes::sequences::routes())
        .merge(routes::print_history::routes())
        .merge(routes::andon::routes())
        // Topic subscriptions
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
