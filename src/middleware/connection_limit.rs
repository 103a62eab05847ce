//! Admission control for relay sessions.
//!
//! Every relay upgrade takes one slot from the global pool and one from its
//! source address before the handler runs. A slot is held for the lifetime of
//! the relay session and given back by the handler's `ConnectionSlot` guard;
//! an upgrade that never reaches `101 Switching Protocols` is released here.
//! Plain HTTP requests such as `/health` are not counted.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Source address of an admitted relay upgrade; owns one connection slot.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

fn wants_websocket(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Admit or refuse a relay upgrade.
///
/// Refusals carry `503` when the relay as a whole is full and `429` when only
/// the caller's address is over its share.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !wants_websocket(&request) {
        return next.run(request).await;
    }

    let ip = addr.ip();
    match state.try_acquire_connection(ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(ip));
            let response = next.run(request).await;
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                state.release_connection(ip);
            }
            response
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                %ip,
                sessions = state.ws_connection_count(),
                "Relay full, refusing upgrade"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "Relay is at session capacity").into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                %ip,
                sessions = state.ip_connection_count(&ip),
                "Per-address session limit reached, refusing upgrade"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many relay sessions from this address",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, extract::connect_info::MockConnectInfo, routing::get};
    use tower::ServiceExt;

    const PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

    fn state_with_limits(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.gemini_api_key = Some("test-key".to_string());
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        AppState::new(config)
    }

    /// Router whose handler never upgrades, so admitted slots come straight back.
    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ws", get(|| async { "no upgrade" }))
            .route("/health", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn_with_state(
                state,
                connection_limit_middleware,
            ))
            .layer(MockConnectInfo(SocketAddr::from(PEER)))
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap()
    }

    fn peer_ip() -> IpAddr {
        SocketAddr::from(PEER).ip()
    }

    #[test]
    fn test_only_websocket_upgrades_are_counted() {
        assert!(wants_websocket(&upgrade_request("/ws")));

        let plain = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        assert!(!wants_websocket(&plain));

        let other = Request::builder()
            .uri("/ws")
            .header(header::UPGRADE, "h2c")
            .body(Body::empty())
            .unwrap();
        assert!(!wants_websocket(&other));
    }

    #[tokio::test]
    async fn test_failed_upgrade_returns_its_slot() {
        let state = state_with_limits(Some(1), 1);

        let response = app(state.clone()).oneshot(upgrade_request("/ws")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&peer_ip()), 0);
    }

    #[tokio::test]
    async fn test_global_limit_is_503() {
        let state = state_with_limits(Some(1), 10);
        state
            .try_acquire_connection("192.0.2.1".parse().unwrap())
            .unwrap();

        let response = app(state.clone()).oneshot(upgrade_request("/ws")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.ws_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_per_address_limit_is_429() {
        let state = state_with_limits(None, 1);
        state.try_acquire_connection(peer_ip()).unwrap();

        let response = app(state.clone()).oneshot(upgrade_request("/ws")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.ip_connection_count(&peer_ip()), 1);
    }

    #[tokio::test]
    async fn test_plain_requests_bypass_limits() {
        let state = state_with_limits(Some(1), 1);
        state.try_acquire_connection(peer_ip()).unwrap();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
