use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::{
    DEFAULT_CLIENT_SEND_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_INBOUND_BUFFER_CEILING_BYTES,
    DEFAULT_JITTER_BUFFER_CEILING_BYTES, DEFAULT_MAX_CONNECTIONS_PER_IP,
    DEFAULT_OUTBOUND_CHUNK_BYTES, DEFAULT_PORT, DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
    DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS, ServerConfig,
};
use crate::core::upstream::GEMINI_LIVE_URL;
use crate::core::upstream::gemini::{DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_VOICE};

/// Build a configuration from environment variables, falling back to defaults.
///
/// `.env` values are already in the environment by the time this runs.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    Ok(ServerConfig {
        host: env_string("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: parse_env("PORT", DEFAULT_PORT)?,

        gemini_api_key: env_string("GEMINI_API_KEY").or_else(|| env_string("GOOGLE_API_KEY")),
        gemini_model: env_string("GEMINI_MODEL")
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        gemini_voice: env_string("GEMINI_VOICE")
            .unwrap_or_else(|| DEFAULT_GEMINI_VOICE.to_string()),
        gemini_ws_url: env_string("GEMINI_WS_URL").unwrap_or_else(|| GEMINI_LIVE_URL.to_string()),
        system_instruction: env_string("SYSTEM_INSTRUCTION"),
        upstream_connect_timeout_ms: parse_env(
            "UPSTREAM_CONNECT_TIMEOUT_MS",
            DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS,
        )?,

        inbound_buffer_ceiling_bytes: parse_env(
            "INBOUND_BUFFER_CEILING_BYTES",
            DEFAULT_INBOUND_BUFFER_CEILING_BYTES,
        )?,
        jitter_buffer_ceiling_bytes: parse_env(
            "JITTER_BUFFER_CEILING_BYTES",
            DEFAULT_JITTER_BUFFER_CEILING_BYTES,
        )?,
        outbound_chunk_bytes: parse_env("OUTBOUND_CHUNK_BYTES", DEFAULT_OUTBOUND_CHUNK_BYTES)?,

        client_send_timeout_ms: parse_env(
            "CLIENT_SEND_TIMEOUT_MS",
            DEFAULT_CLIENT_SEND_TIMEOUT_MS,
        )?,
        session_idle_timeout_secs: parse_env(
            "SESSION_IDLE_TIMEOUT_SECS",
            DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
        )?,

        cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
        max_websocket_connections: parse_optional_env("MAX_WEBSOCKET_CONNECTIONS")?,
        max_connections_per_ip: parse_env(
            "MAX_CONNECTIONS_PER_IP",
            DEFAULT_MAX_CONNECTIONS_PER_IP,
        )?,
    })
}

/// Trimmed value of a variable; unset and blank are treated alike.
fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match parse_optional_env(name)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

fn parse_optional_env<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    env_string(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| format!("Invalid value for {name} '{raw}': {e}"))
        })
        .transpose()
}
