//! Session controller: the event loop and its public surface.
//!
//! One tokio task owns the session state and processes every event in arrival
//! order, so no transition ever races another. Observable state goes out
//! through conflating `watch` channels (amplitude, lifecycle) and an event
//! stream for conversation signals; commands come in as events like
//! everything else.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::effects::{EffectRunner, LiveEffectRunner};
use super::state_machine::{self, reduce, Effect, Event, State};
use super::{ServerEvent, SessionError};
use crate::capture::{AmplitudeBars, AmplitudeMeter, FrameSource, METER_BARS};
use crate::config::LiveConfig;

/// Public session lifecycle, sent to observers on every change.
/// Serializes as a tagged union: `{ "status": "open" }` or
/// `{ "status": "error", "message": "..." }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error { message: String },
}

impl SessionState {
    /// True while the session holds devices or a connection.
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

/// Convert internal state to the public lifecycle view.
fn public_state(state: &State) -> SessionState {
    match state {
        State::Idle => SessionState::Idle,
        State::Connecting { .. } => SessionState::Connecting,
        State::Open { .. } => SessionState::Open,
        State::Closed => SessionState::Closed,
        State::Error { message } => SessionState::Error {
            message: message.clone(),
        },
    }
}

/// Handle to a running session loop.
///
/// Dropping the controller aborts the loop; the runner's resources unwind
/// through their own drop handling.
pub struct SessionController {
    events_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<SessionState>,
    amplitude_rx: watch::Receiver<AmplitudeBars>,
    /// Wrapped in Option so it can be taken for concurrent processing
    server_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    loop_task: tokio::task::JoinHandle<()>,
}

impl SessionController {
    /// Spawn the session loop with the given effect runner.
    /// Must be called from within a tokio runtime.
    pub fn spawn(runner: Arc<dyn EffectRunner>) -> Self {
        let (events_tx, events_rx) = mpsc::channel::<Event>(32);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (amplitude_tx, amplitude_rx) = watch::channel([0.0; METER_BARS]);
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let loop_task = tokio::spawn(run_session_loop(
            events_rx,
            events_tx.clone(),
            runner,
            state_tx,
            amplitude_tx,
            server_tx,
        ));

        Self {
            events_tx,
            state_rx,
            amplitude_rx,
            server_rx: Some(server_rx),
            loop_task,
        }
    }

    /// Controller wired to real devices and the live endpoint.
    ///
    /// `frame_source` is the shell-provided camera; `None` leaves the video
    /// sub-stream off.
    pub fn live(config: LiveConfig, frame_source: Option<Box<dyn FrameSource>>) -> Self {
        Self::spawn(LiveEffectRunner::new(config, frame_source))
    }

    /// Ask the loop to open a session. Returns once the request is queued;
    /// watch `state()` for the outcome.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(Event::Start).await
    }

    /// End the session and wait until every resource has been released.
    /// Safe to call at any time, any number of times.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.send(Event::Stop).await?;
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| !state.is_running())
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Closed("session loop stopped".to_string()))
    }

    /// Submit a complete user text turn. Ignored unless the session is open.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Event::TextSubmitted { text: text.into() }).await
    }

    /// Current lifecycle snapshot.
    pub fn current_state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch the session lifecycle.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Watch the capture amplitude bars; all zeros whenever no session is
    /// running.
    pub fn amplitude(&self) -> watch::Receiver<AmplitudeBars> {
        self.amplitude_rx.clone()
    }

    /// Take ownership of the conversation event stream.
    ///
    /// Returns `None` if already taken.
    pub fn take_server_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.server_rx.take()
    }

    async fn send(&self, event: Event) -> Result<(), SessionError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| SessionError::Closed("session loop stopped".to_string()))
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.loop_task.abort();
    }
}

/// Run the session loop: single writer of the state, in-order effects.
async fn run_session_loop(
    mut events_rx: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
    runner: Arc<dyn EffectRunner>,
    state_tx: watch::Sender<SessionState>,
    amplitude_tx: watch::Sender<AmplitudeBars>,
    server_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut state = State::default();
    let mut meter = AmplitudeMeter::default();

    log::info!("Session loop started");

    while let Some(event) = events_rx.recv().await {
        // Media-bearing events are too large to print
        if !matches!(
            event,
            Event::AudioWindow { .. } | Event::VideoSampled { .. } | Event::Inbound { .. }
        ) {
            log::debug!("Received event: {:?}", event);
        }

        // The meter is observable output, not a transition: update it at the
        // edge, one reading per window of the current session.
        if let Event::AudioWindow { id, samples } = &event {
            if state_machine::session_id(&state) == Some(*id) {
                amplitude_tx.send_replace(meter.update(samples));
            }
        }

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event);
        if old_discriminant != std::mem::discriminant(&next) {
            log::info!("Session transition: {:?} -> {:?}", state, next);
        }
        state = next;

        for effect in effects {
            match effect {
                Effect::PublishState => {
                    let public = public_state(&state);
                    if !public.is_running() {
                        amplitude_tx.send_replace([0.0; METER_BARS]);
                    }
                    state_tx.send_replace(public);
                }
                Effect::EmitServer { event } => {
                    if server_tx.send(event).is_err() {
                        log::debug!("Server event receiver dropped");
                    }
                }
                other => runner.spawn(other, events_tx.clone()),
            }
        }
    }

    log::info!("Session loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::effects::StubEffectRunner;
    use crate::session::protocol::ServerMessage;
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    /// Answers session-open with a transport-open event and hands the session
    /// id to the test so it can inject tagged events.
    struct EchoRunner {
        opened: Mutex<Option<oneshot::Sender<Uuid>>>,
    }

    impl EchoRunner {
        fn create() -> (Arc<Self>, oneshot::Receiver<Uuid>) {
            let (tx, rx) = oneshot::channel();
            (
                Arc::new(Self {
                    opened: Mutex::new(Some(tx)),
                }),
                rx,
            )
        }
    }

    impl EffectRunner for EchoRunner {
        fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
            if let Effect::OpenSession { id } = effect {
                if let Some(opened) = self.opened.lock().unwrap().take() {
                    let _ = opened.send(id);
                }
                tokio::spawn(async move {
                    let _ = tx.send(Event::TransportOpened { id }).await;
                });
            }
        }
    }

    #[tokio::test]
    async fn lifecycle_with_stub_runner() {
        let controller = SessionController::spawn(StubEffectRunner::new());
        let mut state = controller.state();
        assert_eq!(controller.current_state(), SessionState::Idle);

        controller.start().await.unwrap();
        state
            .wait_for(|s| *s == SessionState::Open)
            .await
            .unwrap();

        controller.stop().await.unwrap();
        assert_eq!(controller.current_state(), SessionState::Closed);

        // Idempotent: a second stop returns immediately
        controller.stop().await.unwrap();
        assert_eq!(controller.current_state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn amplitude_follows_windows_of_the_current_session() {
        let (runner, opened) = EchoRunner::create();
        let controller = SessionController::spawn(runner);

        controller.start().await.unwrap();
        let id = opened.await.unwrap();
        controller
            .state()
            .wait_for(|s| *s == SessionState::Open)
            .await
            .unwrap();

        let mut amplitude = controller.amplitude();
        assert_eq!(*amplitude.borrow(), [0.0; METER_BARS]);

        controller
            .events_tx
            .send(Event::AudioWindow {
                id,
                samples: vec![0.5; 64],
            })
            .await
            .unwrap();
        amplitude.changed().await.unwrap();
        assert!(amplitude.borrow().iter().all(|&bar| bar > 0.0));

        // A window from a different session must not move the meter
        controller
            .events_tx
            .send(Event::AudioWindow {
                id: Uuid::new_v4(),
                samples: vec![1.0; 64],
            })
            .await
            .unwrap();

        controller.stop().await.unwrap();
        // Stop zeroes the bars
        let mut amplitude = controller.amplitude();
        amplitude
            .wait_for(|bars| *bars == [0.0; METER_BARS])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conversation_signals_reach_the_event_stream() {
        let (runner, opened) = EchoRunner::create();
        let mut controller = SessionController::spawn(runner);
        let mut events = controller.take_server_events().unwrap();
        assert!(controller.take_server_events().is_none());

        controller.start().await.unwrap();
        let id = opened.await.unwrap();
        controller
            .state()
            .wait_for(|s| *s == SessionState::Open)
            .await
            .unwrap();

        let message: ServerMessage = serde_json::from_str(
            r#"{"serverContent": {
                "turnComplete": true,
                "modelTurn": {"parts": [{"text": "hello there"}]}
            }}"#,
        )
        .unwrap();
        controller
            .events_tx
            .send(Event::Inbound { id, message })
            .await
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(ServerEvent::Text("hello there".to_string()))
        );
        assert_eq!(events.recv().await, Some(ServerEvent::TurnComplete));
    }

    #[tokio::test]
    async fn device_failure_surfaces_the_error_message() {
        struct FailingRunner;
        impl EffectRunner for FailingRunner {
            fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
                if let Effect::OpenSession { id } = effect {
                    tokio::spawn(async move {
                        let _ = tx
                            .send(Event::DeviceFailed {
                                id,
                                err: "no microphone".to_string(),
                            })
                            .await;
                    });
                }
            }
        }

        let controller = SessionController::spawn(Arc::new(FailingRunner));
        controller.start().await.unwrap();

        let mut state = controller.state();
        let reached = state
            .wait_for(|s| matches!(s, SessionState::Error { .. }))
            .await
            .unwrap();
        assert_eq!(
            *reached,
            SessionState::Error {
                message: "no microphone".to_string()
            }
        );

        // Stop after a terminal error is still fine
        controller.stop().await.unwrap();
    }

    #[test]
    fn session_state_serializes_as_tagged_union() {
        let json = serde_json::to_string(&SessionState::Open).unwrap();
        assert_eq!(json, r#"{"status":"open"}"#);

        let json = serde_json::to_string(&SessionState::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""message":"boom""#));
    }
}
