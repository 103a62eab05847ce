use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    /// Sessions started since the process began
    pub total_sessions: u64,
    pub provider: String,
}

/// Health check handler.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        active_sessions: state.sessions.active_sessions(),
        total_sessions: state.sessions.total_sessions(),
        provider: state.sessions.provider_name().to_string(),
    })
}
