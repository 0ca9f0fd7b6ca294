//! Live conversation client core: capture, playback, and session plumbing
//! for talking to a generative model over a bidirectional audio/video
//! channel.
//!
//! The crate is the engine behind a voice-first client: it captures
//! microphone windows and camera frames, streams them to the model, plays
//! the model's audio replies as they arrive, and exposes the session
//! lifecycle and capture amplitude as watchable state. The embedding shell
//! owns windowing, permissions, and rendering; this crate owns everything
//! between the devices and the wire.
//!
//! ```no_run
//! use converse_live::{config, LiveConfig, ServerEvent, SessionController};
//!
//! # async fn run() -> Result<(), converse_live::SessionError> {
//! let config = LiveConfig {
//!     api_key: config::api_key_from_env().unwrap_or_default(),
//!     ..LiveConfig::default()
//! };
//!
//! let mut controller = SessionController::live(config, None);
//! let mut events = match controller.take_server_events() {
//!     Some(events) => events,
//!     None => return Ok(()),
//! };
//!
//! controller.start().await?;
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::Text(text) = event {
//!         println!("{}", text);
//!     }
//! }
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod pcm;
pub mod playback;
pub mod session;

pub use capture::{AmplitudeBars, CaptureError, FrameSource, RawFrame, VideoFrame, METER_BARS};
pub use config::{LiveConfig, ResponseModality};
pub use playback::PlaybackError;
pub use session::{
    EffectRunner, ServerEvent, SessionController, SessionError, SessionState, StubEffectRunner,
};
