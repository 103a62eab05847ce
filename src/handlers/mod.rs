//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - Bidirectional audio relay WebSocket

pub mod api;
pub mod relay;

pub use relay::relay_handler;
