//! Session lifecycle state machine.
//!
//! All transitions go through the `reduce()` function, which returns a new
//! state and a list of effects to execute. The session event loop is the
//! single writer: effects never touch state directly, they feed new events
//! back into the loop.

use uuid::Uuid;

use super::protocol::ServerMessage;
use super::ServerEvent;
use crate::capture::VideoFrame;

/// Lifecycle of the live session. This is the authoritative state - all
/// transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Connecting { session_id: Uuid },
    Open { session_id: Uuid },
    Closed,
    Error { message: String },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

/// Events that can trigger state transitions. These are sent from the public
/// controls, the capture callbacks, and the transport reader.
#[derive(Debug, Clone)]
pub enum Event {
    /// User asked to open a live session
    Start,
    /// User asked to end the session
    Stop,
    /// User submitted a complete text turn
    TextSubmitted { text: String },

    // Transport events (id prevents stale deliveries from an earlier session)
    TransportOpened { id: Uuid },
    TransportClosed { id: Uuid },
    TransportFailed { id: Uuid, err: String },

    /// Microphone or speaker acquisition failed
    DeviceFailed { id: Uuid, err: String },

    // Capture events
    AudioWindow { id: Uuid, samples: Vec<f32> },
    VideoSampled { id: Uuid, frame: VideoFrame },

    /// Parsed message from the server
    Inbound { id: Uuid, message: ServerMessage },
}

/// Effects to be executed after a state transition.
/// The effect runner handles these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Acquire devices, open the transport, report back with a transport event
    OpenSession { id: Uuid },
    /// Start the periodic camera sampler
    StartVideo { id: Uuid },
    /// Release devices and the transport; safe to run more than once
    CloseSession { id: Uuid },
    SendAudio { samples: Vec<f32> },
    SendVideo { frame: VideoFrame },
    SendText { text: String },
    /// Schedule one base64 audio chunk for playback
    PlayAudio { data: String },
    /// Stop playback immediately and drop everything queued
    InterruptPlayback,
    /// Surface a conversation signal to the embedding application
    EmitServer { event: ServerEvent },
    /// Signal to publish the session state to observers
    PublishState,
}

/// Session id the state is bound to, if any.
pub(crate) fn session_id(state: &State) -> Option<Uuid> {
    match state {
        State::Idle | State::Closed | State::Error { .. } => None,
        State::Connecting { session_id } | State::Open { session_id } => Some(*session_id),
    }
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events carrying stale session IDs
/// - Emit PublishState after every lifecycle change
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = session_id(state);

    // Helper: check if event's ID belongs to an earlier session
    let is_stale = |eid: Uuid| current_id.is_some() && Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Opening
        // -----------------
        (Idle | Closed | Error { .. }, Start) => {
            let id = Uuid::new_v4();
            (
                Connecting { session_id: id },
                vec![OpenSession { id }, PublishState],
            )
        }
        // Already running; the second Start changes nothing
        (Connecting { .. } | Open { .. }, Start) => (state.clone(), vec![]),

        (Connecting { session_id }, TransportOpened { id }) if *session_id == id => (
            Open { session_id: id },
            vec![StartVideo { id }, PublishState],
        ),

        // -----------------
        // Stopping
        // -----------------
        (Connecting { session_id } | Open { session_id }, Stop) => (
            Closed,
            vec![
                CloseSession { id: *session_id },
                PublishState,
            ],
        ),
        // Nothing held; repeated stops change nothing
        (Idle | Closed | Error { .. }, Stop) => (state.clone(), vec![]),

        // -----------------
        // Failures and remote close
        // -----------------
        (
            Connecting { session_id } | Open { session_id },
            TransportFailed { id, err },
        ) if *session_id == id => (
            Error { message: err },
            vec![CloseSession { id }, PublishState],
        ),
        (
            Connecting { session_id } | Open { session_id },
            DeviceFailed { id, err },
        ) if *session_id == id => (
            Error { message: err },
            vec![CloseSession { id }, PublishState],
        ),
        (
            Connecting { session_id } | Open { session_id },
            TransportClosed { id },
        ) if *session_id == id => (
            Closed,
            vec![CloseSession { id }, PublishState],
        ),

        // -----------------
        // Outbound media (Open only; windows captured while still
        // Connecting are discarded by the fallback arm)
        // -----------------
        (Open { session_id }, AudioWindow { id, samples }) if *session_id == id => {
            (state.clone(), vec![SendAudio { samples }])
        }
        (Open { session_id }, VideoSampled { id, frame }) if *session_id == id => {
            (state.clone(), vec![SendVideo { frame }])
        }
        (Open { .. }, TextSubmitted { text }) => (state.clone(), vec![SendText { text }]),

        // -----------------
        // Inbound messages
        // -----------------
        (Open { session_id }, Inbound { id, message }) if *session_id == id => {
            if let Some(err) = message.error_message() {
                (
                    Error {
                        message: err.to_string(),
                    },
                    vec![CloseSession { id }, PublishState],
                )
            } else {
                let mut effects = Vec::new();
                // Interruption cuts playback before anything else in the
                // message is processed
                if message.is_interrupted() {
                    effects.push(InterruptPlayback);
                    effects.push(EmitServer {
                        event: ServerEvent::Interrupted,
                    });
                }
                for chunk in message.audio_chunks() {
                    effects.push(PlayAudio {
                        data: chunk.data.clone(),
                    });
                }
                for text in message.text_parts() {
                    effects.push(EmitServer {
                        event: ServerEvent::Text(text.to_string()),
                    });
                }
                if message.is_turn_complete() {
                    effects.push(EmitServer {
                        event: ServerEvent::TurnComplete,
                    });
                }
                (state.clone(), effects)
            }
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, TransportOpened { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TransportClosed { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TransportFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, DeviceFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioWindow { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, VideoSampled { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, Inbound { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
