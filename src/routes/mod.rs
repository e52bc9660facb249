//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the board REST surface and the per-board WebSocket endpoint under
//! one Axum router. Upstream concerns (TLS, CAPTCHA, static assets) live in
//! front of this service.

pub mod boards;
pub mod ws;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/board", post(boards::create_board))
        .route("/api/board/{id}/user/{user}", get(boards::get_board))
        .route("/api/board/{id}/user/{user}/refresh", get(boards::refresh))
        .route("/api/board/{id}", delete(boards::delete_board))
        .route("/ws/board/{id}", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness plus the degraded-durability signal: a persistent snapshot
/// flush failure flips this to 503 while hubs keep serving from memory.
async fn healthz(State(state): State<AppState>) -> Response {
    match state.health.last_flush_error() {
        None => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "activeBoards": state.registry.active_boards(),
            })),
        )
            .into_response(),
        Some(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "lastFlushError": error,
            })),
        )
            .into_response(),
    }
}
