//! Per-connection relay session.
//!
//! A session pairs one client transport with one upstream model session and
//! runs the turn machine between them:
//!
//! - [`codec`]: client wire frames to and from typed messages
//! - [`turn`]: turn-taking state machine
//! - [`inbound`]: capture audio to the upstream, with a backpressure ceiling
//! - [`jitter`]: bounded playback buffer and the client delivery task
//! - [`router`]: client frames and upstream events to turn triggers
//! - [`manager`]: session lifecycle and the main event loop

pub mod codec;
pub mod inbound;
pub mod jitter;
pub mod manager;
pub mod router;
pub mod transport;
pub mod turn;

pub use codec::{ControlMessage, InboundFrame, OutboundFrame};
pub use manager::{SessionManager, SessionSettings, SessionSummary};
pub use transport::{
    ChannelReceiver, ChannelSender, TransportReceiver, TransportSender, WireMessage,
    channel_transport,
};
pub use turn::{TurnMachine, TurnState};
