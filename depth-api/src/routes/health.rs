//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use depth_core::{ConnectionHealth, ConnectionStatus, InstrumentMapping};
use depth_services::BookSummary;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    stream: ConnectionHealth,
    instruments: Vec<InstrumentMapping>,
    books: Vec<BookSummary>,
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stream = state.stream.health();

    let healthy = stream.status == ConnectionStatus::Connected;
    let status = if healthy { "healthy" } else { "degraded" };

    let response = HealthResponse {
        status: status.to_string(),
        stream,
        instruments: state.feed.tracked_instruments(),
        books: state.store.summaries(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}
