use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

pub mod api;
pub mod relay;

/// Assemble every route with its middleware.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the connection limit keys on the peer address.
pub fn create_router(state: Arc<AppState>) -> Router {
    let relay_routes = relay::create_relay_router().layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));

    api::create_api_router()
        .merge(relay_routes)
        .with_state(state)
}
