//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub server_time: u64,
    pub tick: u64,
    pub tick_rate_hz: u32,
    pub sessions: usize,
    pub active_players: usize,
    pub history_len: usize,
    pub history_capacity: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.server.store();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.clock.uptime_secs(),
        server_time: state.clock.now(),
        tick: state.server.current_tick(),
        tick_rate_hz: state.config.tick_rate_hz,
        sessions: state.sessions.len(),
        active_players: state.sessions.active_count(),
        history_len: store.len(),
        history_capacity: store.capacity(),
    })
}
