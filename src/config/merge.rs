use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Load the environment configuration and apply YAML overrides on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    if let Some(yaml) = yaml {
        apply_yaml(&mut config, yaml);
    }
    Ok(config)
}

fn apply_yaml(config: &mut ServerConfig, yaml: YamlConfig) {
    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(gemini) = yaml.gemini {
        if let Some(api_key) = gemini.api_key.filter(|key| !key.trim().is_empty()) {
            replace_secret(&mut config.gemini_api_key, api_key);
        }
        if let Some(model) = gemini.model {
            config.gemini_model = model;
        }
        if let Some(voice) = gemini.voice {
            config.gemini_voice = voice;
        }
        if let Some(ws_url) = gemini.ws_url {
            config.gemini_ws_url = ws_url;
        }
        if gemini.system_instruction.is_some() {
            config.system_instruction = gemini.system_instruction;
        }
        if let Some(timeout) = gemini.connect_timeout_ms {
            config.upstream_connect_timeout_ms = timeout;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(ceiling) = audio.inbound_buffer_ceiling_bytes {
            config.inbound_buffer_ceiling_bytes = ceiling;
        }
        if let Some(ceiling) = audio.jitter_buffer_ceiling_bytes {
            config.jitter_buffer_ceiling_bytes = ceiling;
        }
        if let Some(chunk) = audio.outbound_chunk_bytes {
            config.outbound_chunk_bytes = chunk;
        }
    }

    if let Some(session) = yaml.session {
        if let Some(timeout) = session.client_send_timeout_ms {
            config.client_send_timeout_ms = timeout;
        }
        if let Some(idle) = session.idle_timeout_secs {
            config.session_idle_timeout_secs = idle;
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }
}

fn replace_secret(slot: &mut Option<String>, value: String) {
    use zeroize::Zeroize;

    if let Some(old) = slot.as_mut() {
        old.zeroize();
    }
    *slot = Some(value);
}
