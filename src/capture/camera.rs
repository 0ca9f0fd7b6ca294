//! Camera frame sampling and encoding.
//!
//! The platform camera is opened by the shell (which owns permission prompts
//! and windowing) and handed in as a pull-based [`FrameSource`]. This module
//! owns the cadence and the wire form: every sampling interval it snapshots a
//! frame, downscales it to a fraction of its native resolution, encodes JPEG,
//! and emits a [`VideoFrame`]. A snapshot or encode failure skips that frame;
//! the sub-stream itself keeps running.

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use super::CaptureError;

/// One uncompressed camera frame: tightly packed row-major RGBA8.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Pull-based camera handle provided by the shell.
///
/// `snapshot` is called once per sampling interval on the sampler task and
/// should return promptly with the most recent frame. Implementations own the
/// platform device and release it on drop.
pub trait FrameSource: Send {
    fn snapshot(&mut self) -> Result<RawFrame, CaptureError>;
}

/// One encoded outbound video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// Downscale by `scale` (linear) and encode JPEG at `quality`.
///
/// Scaled dimensions are floored at one pixel so tiny sources stay encodable.
pub fn encode_frame(frame: RawFrame, scale: f32, quality: u8) -> Result<VideoFrame, CaptureError> {
    let RawFrame {
        width,
        height,
        pixels,
    } = frame;

    let image = image::RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        CaptureError::InvalidFrame(format!("pixel buffer does not match {}x{}", width, height))
    })?;

    let scaled_w = (((width as f32) * scale).round() as u32).max(1);
    let scaled_h = (((height as f32) * scale).round() as u32).max(1);

    let rgb = image::DynamicImage::ImageRgba8(image)
        .resize_exact(scaled_w, scaled_h, FilterType::Triangle)
        .to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| CaptureError::InvalidFrame(e.to_string()))?;

    Ok(VideoFrame {
        mime_type: "image/jpeg",
        data: jpeg,
    })
}

/// Run the video sub-stream: snapshot, downscale, encode, emit.
///
/// Frames go out through `frames_tx` with a non-blocking send; when the
/// session loop is behind, the frame is dropped rather than queued late.
/// Exits on the stop signal or when the receiving side is gone, handing the
/// source back so a later session can reuse it.
pub async fn run_frame_sampler(
    mut source: Box<dyn FrameSource>,
    interval_ms: u64,
    scale: f32,
    quality: u8,
    frames_tx: mpsc::Sender<VideoFrame>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Box<dyn FrameSource> {
    let mut tick = interval(Duration::from_millis(interval_ms.max(1)));

    log::debug!("Frame sampler started ({} ms interval)", interval_ms);

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("Frame sampler received stop signal");
                break;
            }
            _ = tick.tick() => {
                let frame = match source.snapshot() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Camera snapshot failed: {}", e);
                        continue;
                    }
                };

                match encode_frame(frame, scale, quality) {
                    Ok(video) => match frames_tx.try_send(video) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            log::debug!("Video frame dropped: session loop behind");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    Err(e) => log::warn!("Frame encode failed: {}", e),
                }
            }
        }
    }

    log::debug!("Frame sampler stopped");
    source
}
