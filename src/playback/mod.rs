//! Playback pipeline for inbound audio.
//!
//! Decoded buffers arrive in message order and must play back-to-back with no
//! gap and no overlap. A virtual clock tracks the end of the last scheduled
//! buffer; each new buffer starts at `max(next_start, now)`, keeping the chain
//! contiguous even under arrival jitter. An interruption from the remote end
//! stops everything currently active, flushes the device queue, and resets the
//! virtual clock.
//!
//! ```text
//! base64 chunk ──▶ PlaybackHandle ──▶ worker task ──▶ scheduler (virtual clock)
//!                                        │                   │
//!                                        ▼                   ▼
//!                                   device queue ──▶ cpal output stream
//! ```

mod output;
mod scheduler;
mod worker;

pub use output::AudioOutput;
pub use scheduler::{buffer_duration, PlaybackClock, PlaybackScheduler, Scheduled, StreamClock};
pub use worker::{PlaybackHandle, PlaybackSink};

/// Errors raised while acquiring the audio output device.
#[derive(Debug, Clone)]
pub enum PlaybackError {
    /// No audio output device is available.
    NoOutputDevice,
    /// The output device accepted neither the playback rate nor its double.
    NoSupportedConfig,
    /// Building or starting the output stream failed.
    StreamCreationFailed(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::NoOutputDevice => write!(f, "No audio output device found"),
            PlaybackError::NoSupportedConfig => {
                write!(f, "No supported audio output configuration")
            }
            PlaybackError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio output stream: {}", e)
            }
        }
    }
}

impl std::error::Error for PlaybackError {}
