//! Capture pipeline: microphone windows, camera frames, amplitude meter.
//!
//! Two independent timed streams feed the session controller:
//!
//! ```text
//! Microphone (device rate) ──▶ mono fold ──▶ ÷N downsample (16kHz)
//!                                                │
//!                                                ▼
//!                                       4096-sample windows ──▶ session loop
//!
//! Camera snapshot (1 Hz) ──▶ 20% downscale ──▶ JPEG ──▶ session loop
//! ```
//!
//! The microphone runs on a dedicated OS thread because cpal streams are not
//! `Send`; windows leave the device callback through a non-blocking callback
//! and are dropped, never queued late, when the session loop is behind. The
//! camera is a pull-based [`FrameSource`] handed in by the shell, sampled on
//! a fixed wall-clock interval.

mod camera;
mod meter;
mod microphone;

pub use camera::{encode_frame, run_frame_sampler, FrameSource, RawFrame, VideoFrame};
pub use meter::{AmplitudeBars, AmplitudeMeter, METER_BARS};
pub use microphone::{start_capture, MicrophoneHandle, WindowAssembler};

/// Errors raised while acquiring or running capture devices.
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// No audio input device is available.
    NoInputDevice,
    /// The input device has no usable stream configuration.
    NoSupportedConfig,
    /// The device rate is not an integer multiple of the capture rate.
    UnsupportedRate(u32),
    /// Building or starting the input stream failed.
    StreamCreationFailed(String),
    /// The camera source could not produce a frame.
    CameraUnavailable(String),
    /// A camera frame could not be interpreted or encoded.
    InvalidFrame(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::UnsupportedRate(rate) => {
                write!(f, "Device rate {} Hz has no integer ratio to the capture rate", rate)
            }
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::CameraUnavailable(e) => write!(f, "Camera unavailable: {}", e),
            CaptureError::InvalidFrame(e) => write!(f, "Invalid camera frame: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}
