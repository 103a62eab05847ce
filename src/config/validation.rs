use super::ServerConfig;

/// Validate a merged configuration.
///
/// # Errors
/// Returns a message naming the first offending setting.
pub(super) fn validate(config: &ServerConfig) -> Result<(), String> {
    validate_api_key(&config.gemini_api_key)?;
    validate_ws_url(&config.gemini_ws_url)?;
    validate_buffers(
        config.inbound_buffer_ceiling_bytes,
        config.jitter_buffer_ceiling_bytes,
        config.outbound_chunk_bytes,
    )?;
    validate_timeouts(
        config.upstream_connect_timeout_ms,
        config.client_send_timeout_ms,
        config.session_idle_timeout_secs,
    )?;
    validate_connection_limits(config.max_websocket_connections, config.max_connections_per_ip)
}

pub(super) fn validate_api_key(api_key: &Option<String>) -> Result<(), String> {
    match api_key {
        Some(key) if !key.trim().is_empty() => Ok(()),
        _ => Err("GEMINI_API_KEY (or GOOGLE_API_KEY) must be set".to_string()),
    }
}

pub(super) fn validate_ws_url(ws_url: &str) -> Result<(), String> {
    let parsed =
        url::Url::parse(ws_url).map_err(|e| format!("Invalid GEMINI_WS_URL '{ws_url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(format!(
            "GEMINI_WS_URL must use ws:// or wss://, got '{scheme}://'"
        )),
    }
}

pub(super) fn validate_buffers(
    inbound_ceiling: usize,
    jitter_ceiling: usize,
    chunk_bytes: usize,
) -> Result<(), String> {
    if inbound_ceiling == 0 {
        return Err("INBOUND_BUFFER_CEILING_BYTES must be greater than zero".to_string());
    }
    if jitter_ceiling == 0 {
        return Err("JITTER_BUFFER_CEILING_BYTES must be greater than zero".to_string());
    }
    if chunk_bytes == 0 || chunk_bytes % 2 != 0 {
        return Err(format!(
            "OUTBOUND_CHUNK_BYTES must be a positive even number of bytes, got {chunk_bytes}"
        ));
    }
    if chunk_bytes > jitter_ceiling {
        return Err(format!(
            "OUTBOUND_CHUNK_BYTES ({chunk_bytes}) must not exceed JITTER_BUFFER_CEILING_BYTES ({jitter_ceiling})"
        ));
    }
    Ok(())
}

pub(super) fn validate_timeouts(
    connect_timeout_ms: u64,
    send_timeout_ms: u64,
    idle_timeout_secs: u64,
) -> Result<(), String> {
    if connect_timeout_ms == 0 {
        return Err("UPSTREAM_CONNECT_TIMEOUT_MS must be greater than zero".to_string());
    }
    if send_timeout_ms == 0 {
        return Err("CLIENT_SEND_TIMEOUT_MS must be greater than zero".to_string());
    }
    if idle_timeout_secs == 0 {
        return Err("SESSION_IDLE_TIMEOUT_SECS must be greater than zero".to_string());
    }
    Ok(())
}

pub(super) fn validate_connection_limits(
    max_websocket_connections: Option<usize>,
    max_connections_per_ip: u32,
) -> Result<(), String> {
    if max_websocket_connections == Some(0) {
        return Err("MAX_WEBSOCKET_CONNECTIONS must be greater than zero when set".to_string());
    }
    if max_connections_per_ip == 0 {
        return Err("MAX_CONNECTIONS_PER_IP must be greater than zero".to_string());
    }
    Ok(())
}
