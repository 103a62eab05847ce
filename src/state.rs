//! Shared application state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::core::session::SessionManager;
use crate::core::upstream::{GeminiLiveConnector, UpstreamConnector};

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// State shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: SessionManager,
    ws_connections: AtomicUsize,
    ip_connections: Mutex<HashMap<IpAddr, u32>>,
}

impl AppState {
    /// Build state backed by the Gemini Live upstream.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let connector = Arc::new(GeminiLiveConnector::new(config.gemini_config()));
        Self::with_connector(config, connector)
    }

    /// Build state around an arbitrary upstream connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn UpstreamConnector>) -> Arc<Self> {
        let sessions = SessionManager::new(connector, config.session_settings());
        Arc::new(Self {
            config,
            sessions,
            ws_connections: AtomicUsize::new(0),
            ip_connections: Mutex::new(HashMap::new()),
        })
    }

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// Every successful call must be paired with [`release_connection`](Self::release_connection).
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let mut per_ip = self.ip_connections.lock();

        if let Some(max) = self.config.max_websocket_connections
            && self.ws_connections.load(Ordering::Acquire) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        if per_ip.get(&ip).copied().unwrap_or(0) >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        *per_ip.entry(ip).or_insert(0) += 1;
        self.ws_connections.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release a slot reserved by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let mut per_ip = self.ip_connections.lock();
        if let Some(count) = per_ip.get_mut(&ip)
            && *count > 0
        {
            *count -= 1;
            if *count == 0 {
                per_ip.remove(&ip);
            }
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.lock().get(ip).copied().unwrap_or(0)
    }
}
