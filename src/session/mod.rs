//! Live session orchestration.
//!
//! A session wires microphone capture, camera sampling, speaker playback,
//! and the WebSocket transport into one event loop:
//!
//! ```text
//!  microphone --> AudioWindow ---+                        +--> outbound writer --> socket
//!  camera ------> VideoSampled --+-> events -> reduce() --+--> playback worker
//!  socket ------> Inbound -------+       |                +--> server events
//!                                        v
//!                            state + amplitude watches
//! ```
//!
//! The loop is the single writer of session state. Effects produced by the
//! reducer are handed to an [`EffectRunner`]; everything the runner learns
//! flows back in as events tagged with the session id, so late results from
//! an earlier session are ignored.

pub mod controller;
pub mod effects;
pub mod protocol;
pub mod state_machine;
pub mod transport;

pub use controller::{SessionController, SessionState};
pub use effects::{EffectRunner, LiveEffectRunner, StubEffectRunner};
pub use state_machine::{reduce, Effect, Event, State};
pub use transport::{LiveTransport, TransportEvent};

use std::fmt;

/// Errors surfaced by the live channel.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Could not reach the endpoint
    ConnectFailed(String),
    /// Connected, but the setup exchange did not complete
    HandshakeFailed(String),
    /// An outbound message could not be written
    SendFailed(String),
    /// The channel closed underneath us
    Closed(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectFailed(msg) => write!(f, "Connection failed: {}", msg),
            SessionError::HandshakeFailed(msg) => write!(f, "Session setup failed: {}", msg),
            SessionError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            SessionError::Closed(msg) => write!(f, "Channel closed: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Conversation signals surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Text emitted alongside (or instead of) audio
    Text(String),
    /// The model finished its turn
    TurnComplete,
    /// The user spoke over the model; playback was cut
    Interrupted,
}
