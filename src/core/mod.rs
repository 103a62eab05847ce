pub mod audio;
pub mod session;
pub mod upstream;

// Re-export commonly used types for convenience
pub use audio::{AudioFrame, Direction};
pub use session::{
    SessionManager, SessionSettings, SessionSummary, TransportReceiver, TransportSender,
    TurnState, WireMessage,
};
pub use upstream::{
    GeminiLiveConfig, GeminiLiveConnector, OpenSessionRequest, UpstreamConnector, UpstreamError,
    UpstreamEvent, UpstreamHandle, UpstreamResult, UpstreamSession,
};
