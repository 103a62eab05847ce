//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoints
///
/// - `GET /` - WebSocket upgrade for a relay session
/// - `GET /ws` - same, for clients that expect a path
///
/// Both accept an optional `session_id` query parameter to resume a previous
/// upstream session.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(relay_handler))
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
