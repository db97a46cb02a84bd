use axum::{Json, Router};

use crate::state::AppState;
use crate::sync::SyncStats;
use crate::ws::handler as ws_handler;

/// GET /api/sync/stats — connection and room counters for monitoring.
async fn sync_stats(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<SyncStats> {
    Json(state.hub.stats())
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Monitoring
    let stats_routes = Router::new().route("/api/sync/stats", axum::routing::get(sync_stats));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(stats_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
