//! Effect runner for the live session.
//!
//! Executes the effects produced by the state machine. Outbound sends and
//! playback commands run inline on the session loop (a sync push onto the
//! relevant queue) so wire order matches reducer order; device acquisition
//! and connection setup run as spawned tasks that report back through
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::protocol::ClientMessage;
use super::state_machine::{Effect, Event};
use super::transport::{LiveTransport, TransportEvent};
use crate::capture::{run_frame_sampler, start_capture, FrameSource, MicrophoneHandle};
use crate::config::LiveConfig;
use crate::pcm;
use crate::playback::PlaybackHandle;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Per-session resources. Guarded by a sync mutex held only for short,
/// await-free sections.
#[derive(Default)]
struct Inner {
    /// Session the stored handles belong to; spawned acquisitions check this
    /// before storing so a stop that raced them still releases everything
    current: Option<Uuid>,
    mic: Option<MicrophoneHandle>,
    playback: Option<PlaybackHandle>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    /// Tells the writer task to stop without draining what is still queued
    closing: Option<Arc<AtomicBool>>,
    video_stop: Option<oneshot::Sender<()>>,
}

/// Real effect runner: cpal devices, the shell-provided camera, and the
/// WebSocket transport.
pub struct LiveEffectRunner {
    config: LiveConfig,
    /// Camera handle; parked here between sessions and while video is off
    frame_source: Arc<Mutex<Option<Box<dyn FrameSource>>>>,
    inner: Arc<Mutex<Inner>>,
}

impl LiveEffectRunner {
    /// `frame_source` is the shell-provided camera; `None` leaves the video
    /// sub-stream off.
    pub fn new(config: LiveConfig, frame_source: Option<Box<dyn FrameSource>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            frame_source: Arc::new(Mutex::new(frame_source)),
            inner: Arc::new(Mutex::new(Inner::default())),
        })
    }

    fn send_outbound(&self, msg: ClientMessage) {
        let guard = lock(&self.inner);
        if let Some(outbound) = &guard.outbound {
            if outbound.send(msg).is_err() {
                log::debug!("Outbound queue closed; dropping message");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl EffectRunner for LiveEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenSession { id } => {
                lock(&self.inner).current = Some(id);

                let config = self.config.clone();
                let inner = Arc::clone(&self.inner);

                tokio::spawn(async move {
                    // Speakers first: inbound audio can arrive right after
                    // the handshake.
                    let playback = match PlaybackHandle::start(config.playback_sample_rate) {
                        Ok(playback) => playback,
                        Err(e) => {
                            log::error!("Failed to open audio output: {}", e);
                            let _ = tx.send(Event::DeviceFailed { id, err: e.to_string() }).await;
                            return;
                        }
                    };
                    {
                        let mut guard = lock(&inner);
                        if guard.current != Some(id) {
                            drop(guard);
                            playback.shutdown();
                            return;
                        }
                        guard.playback = Some(playback);
                    }

                    let window_tx = tx.clone();
                    let capture = start_capture(
                        config.capture_window,
                        config.capture_sample_rate,
                        move |samples| {
                            // Audio-thread context: hand off without blocking
                            match window_tx.try_send(Event::AudioWindow { id, samples }) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    log::debug!("Capture window dropped: session loop behind");
                                }
                                Err(TrySendError::Closed(_)) => {}
                            }
                        },
                    );
                    let mic = match capture {
                        Ok(mic) => mic,
                        Err(e) => {
                            log::error!("Failed to open microphone: {}", e);
                            let _ = tx.send(Event::DeviceFailed { id, err: e.to_string() }).await;
                            return;
                        }
                    };
                    {
                        let mut guard = lock(&inner);
                        if guard.current != Some(id) {
                            drop(guard);
                            tokio::task::spawn_blocking(move || {
                                let mut mic = mic;
                                mic.stop();
                            });
                            return;
                        }
                        guard.mic = Some(mic);
                    }

                    let mut transport = match LiveTransport::connect(&config).await {
                        Ok(transport) => transport,
                        Err(e) => {
                            let _ = tx
                                .send(Event::TransportFailed { id, err: e.to_string() })
                                .await;
                            return;
                        }
                    };
                    let mut incoming = match transport.take_incoming() {
                        Some(incoming) => incoming,
                        None => {
                            let _ = tx
                                .send(Event::TransportFailed {
                                    id,
                                    err: "transport receiver unavailable".to_string(),
                                })
                                .await;
                            return;
                        }
                    };

                    let (outbound_tx, mut outbound_rx) =
                        mpsc::unbounded_channel::<ClientMessage>();
                    let closing = Arc::new(AtomicBool::new(false));

                    // Single writer: wire order is queue order.
                    let writer_closing = Arc::clone(&closing);
                    let writer_tx = tx.clone();
                    tokio::spawn(async move {
                        while let Some(msg) = outbound_rx.recv().await {
                            if writer_closing.load(Ordering::Relaxed) {
                                break;
                            }
                            if let Err(e) = transport.send(&msg).await {
                                log::warn!("Live channel send failed: {}", e);
                                let _ = writer_tx
                                    .send(Event::TransportFailed { id, err: e.to_string() })
                                    .await;
                                break;
                            }
                        }
                        transport.close().await;
                        log::debug!("Writer task exiting");
                    });

                    // Single forwarder: inbound order is arrival order.
                    let forward_tx = tx.clone();
                    tokio::spawn(async move {
                        while let Some(event) = incoming.recv().await {
                            let event = match event {
                                TransportEvent::Message(message) => {
                                    Event::Inbound { id, message }
                                }
                                TransportEvent::Closed => Event::TransportClosed { id },
                                TransportEvent::Failed(err) => {
                                    Event::TransportFailed { id, err }
                                }
                            };
                            if forward_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        log::debug!("Inbound forward task exiting");
                    });

                    {
                        let mut guard = lock(&inner);
                        if guard.current != Some(id) {
                            drop(guard);
                            closing.store(true, Ordering::Relaxed);
                            drop(outbound_tx);
                            return;
                        }
                        guard.outbound = Some(outbound_tx);
                        guard.closing = Some(closing);
                    }

                    let _ = tx.send(Event::TransportOpened { id }).await;
                });
            }

            Effect::StartVideo { id } => {
                let source = lock(&self.frame_source).take();
                let Some(source) = source else {
                    log::debug!("No camera source configured; video sub-stream stays off");
                    return;
                };

                let (frames_tx, mut frames_rx) = mpsc::channel(4);
                let (stop_tx, stop_rx) = oneshot::channel();

                let interval_ms = self.config.video_interval_ms;
                let scale = self.config.video_scale;
                let quality = self.config.jpeg_quality;
                let slot = Arc::clone(&self.frame_source);
                tokio::spawn(async move {
                    let source =
                        run_frame_sampler(source, interval_ms, scale, quality, frames_tx, stop_rx)
                            .await;
                    // Park the camera for the next session
                    *lock(&slot) = Some(source);
                });

                tokio::spawn(async move {
                    while let Some(frame) = frames_rx.recv().await {
                        if tx.send(Event::VideoSampled { id, frame }).await.is_err() {
                            break;
                        }
                    }
                });

                let mut guard = lock(&self.inner);
                if guard.current == Some(id) {
                    guard.video_stop = Some(stop_tx);
                } else {
                    let _ = stop_tx.send(());
                }
            }

            Effect::CloseSession { id } => {
                let (mic, playback, outbound, closing, video_stop) = {
                    let mut guard = lock(&self.inner);
                    if guard.current.is_some() && guard.current != Some(id) {
                        // A newer session owns the stored handles
                        return;
                    }
                    guard.current = None;
                    (
                        guard.mic.take(),
                        guard.playback.take(),
                        guard.outbound.take(),
                        guard.closing.take(),
                        guard.video_stop.take(),
                    )
                };

                if let Some(closing) = closing {
                    closing.store(true, Ordering::Relaxed);
                }
                // Dropping the queue ends the writer task, which closes the
                // socket and stops the reader with it.
                drop(outbound);

                if let Some(stop) = video_stop {
                    let _ = stop.send(());
                }
                if let Some(playback) = playback {
                    playback.shutdown();
                }
                if let Some(mut mic) = mic {
                    // stop() joins the capture thread
                    tokio::task::spawn_blocking(move || mic.stop());
                }
                log::info!("Session resources released");
            }

            Effect::SendAudio { samples } => {
                let encoded = pcm::encode(&samples);
                self.send_outbound(ClientMessage::realtime_audio(
                    &encoded,
                    &self.config.capture_mime(),
                ));
            }

            Effect::SendVideo { frame } => {
                self.send_outbound(ClientMessage::realtime_video(&frame));
            }

            Effect::SendText { text } => {
                self.send_outbound(ClientMessage::user_text(&text));
            }

            Effect::PlayAudio { data } => {
                let guard = lock(&self.inner);
                if let Some(playback) = &guard.playback {
                    playback.enqueue(data);
                }
            }

            Effect::InterruptPlayback => {
                let guard = lock(&self.inner);
                if let Some(playback) = &guard.playback {
                    playback.interrupt();
                }
            }

            Effect::PublishState | Effect::EmitServer { .. } => {
                // Handled in the session loop, not here
                unreachable!("observer effects are handled in the session loop");
            }
        }
    }
}

/// Stub effect runner: answers session-open immediately and swallows media
/// effects. Lets the controller be driven without devices or network.
pub struct StubEffectRunner;

impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Default for StubEffectRunner {
    fn default() -> Self {
        Self
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenSession { id } => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    log::info!("Stub: session opened");
                    let _ = tx.send(Event::TransportOpened { id }).await;
                });
            }
            Effect::StartVideo { .. } => {}
            Effect::CloseSession { .. } => {
                log::debug!("Stub: session resources released");
            }
            Effect::SendAudio { samples } => {
                log::debug!("Stub: would send {} samples", samples.len());
            }
            Effect::SendVideo { frame } => {
                log::debug!("Stub: would send {} byte frame", frame.data.len());
            }
            Effect::SendText { text } => {
                log::info!("Stub: would send text turn: {}", text);
            }
            Effect::PlayAudio { data } => {
                log::debug!("Stub: would play {} base64 chars", data.len());
            }
            Effect::InterruptPlayback => {
                log::debug!("Stub: playback interrupted");
            }
            Effect::PublishState | Effect::EmitServer { .. } => {
                unreachable!("observer effects are handled in the session loop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_open_session_reports_transport_open() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = StubEffectRunner::new();
        let id = Uuid::new_v4();

        runner.spawn(Effect::OpenSession { id }, tx);

        match rx.recv().await {
            Some(Event::TransportOpened { id: got }) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn media_effects_without_a_session_are_dropped() {
        let (tx, _rx) = mpsc::channel(8);
        let runner = LiveEffectRunner::new(LiveConfig::default(), None);

        // No session open: all of these must be quiet no-ops.
        runner.spawn(
            Effect::SendAudio {
                samples: vec![0.0; 4],
            },
            tx.clone(),
        );
        runner.spawn(
            Effect::PlayAudio {
                data: "AAAA".to_string(),
            },
            tx.clone(),
        );
        runner.spawn(Effect::InterruptPlayback, tx);
    }

    #[tokio::test]
    async fn close_session_without_handles_is_harmless() {
        let (tx, _rx) = mpsc::channel(8);
        let runner = LiveEffectRunner::new(LiveConfig::default(), None);
        let id = Uuid::new_v4();

        runner.spawn(Effect::CloseSession { id }, tx.clone());
        runner.spawn(Effect::CloseSession { id }, tx);
    }
}
