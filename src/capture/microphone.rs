//! Microphone capture on a dedicated audio thread.
//!
//! cpal streams are not `Send`, so the stream lives on its own OS thread for
//! the pipeline's lifetime. The data callback folds interleaved device frames
//! to mono, downsamples the device rate to the capture rate by integer-ratio
//! averaging, and assembles fixed-size windows. Complete windows are handed to
//! the caller's callback on the audio thread; the callback must not block.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use super::CaptureError;

/// Device rates tried when the default input config has no integer ratio to
/// the capture rate.
const FALLBACK_RATES: [u32; 3] = [48_000, 32_000, 16_000];

/// Folds interleaved device samples into fixed-size mono windows at the
/// capture rate. Pure accumulation, separately testable from the device.
pub struct WindowAssembler {
    channels: usize,
    ratio: usize,
    window: usize,
    carry: Vec<f32>,
    mono: Vec<f32>,
    pending: Vec<f32>,
}

impl WindowAssembler {
    /// `device_rate` must be an integer multiple of `target_rate`.
    pub fn new(
        channels: usize,
        device_rate: u32,
        target_rate: u32,
        window: usize,
    ) -> Result<Self, CaptureError> {
        if channels == 0 || window == 0 || target_rate == 0 {
            return Err(CaptureError::NoSupportedConfig);
        }
        if device_rate == 0 || device_rate % target_rate != 0 {
            return Err(CaptureError::UnsupportedRate(device_rate));
        }
        Ok(Self {
            channels,
            ratio: (device_rate / target_rate) as usize,
            window,
            carry: Vec::new(),
            mono: Vec::new(),
            pending: Vec::with_capacity(window),
        })
    }

    /// Feed interleaved device samples; returns every window completed by
    /// this batch, in capture order.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        self.carry.extend_from_slice(interleaved);

        // Fold whole frames to mono; a trailing partial frame stays carried.
        let whole = self.carry.len() / self.channels * self.channels;
        for frame in self.carry[..whole].chunks_exact(self.channels) {
            self.mono.push(frame.iter().sum::<f32>() / self.channels as f32);
        }
        self.carry.drain(..whole);

        // Integer-ratio downsample by averaging each group of `ratio` samples.
        let groups = self.mono.len() / self.ratio;
        for group in self.mono[..groups * self.ratio].chunks_exact(self.ratio) {
            self.pending
                .push(group.iter().sum::<f32>() / self.ratio as f32);
        }
        self.mono.drain(..groups * self.ratio);

        let mut windows = Vec::new();
        while self.pending.len() >= self.window {
            windows.push(self.pending.drain(..self.window).collect());
        }
        windows
    }
}

/// Handle to a running microphone capture.
///
/// Stopping (or dropping) signals the audio thread, which drops the cpal
/// stream and exits; the hardware handle is released exactly once.
pub struct MicrophoneHandle {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneHandle {
    /// Stop capture and release the input device. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start capturing mono windows of `window` samples at `target_rate`.
///
/// `on_window` runs on the audio thread once per completed window and must
/// hand the window off without blocking (a `try_send` into the session loop).
/// Returns after the device stream is running, or with the acquisition error
/// that prevented it from starting.
pub fn start_capture<F>(
    window: usize,
    target_rate: u32,
    on_window: F,
) -> Result<MicrophoneHandle, CaptureError>
where
    F: FnMut(Vec<f32>) + Send + 'static,
{
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), CaptureError>>(1);
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            let stream = match open_input_stream(window, target_rate, on_window) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Hold the stream until the handle drops its sender.
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("Capture thread exiting");
        })
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(MicrophoneHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(CaptureError::StreamCreationFailed(
                "capture thread exited during setup".to_string(),
            ))
        }
    }
}

fn open_input_stream<F>(
    window: usize,
    target_rate: u32,
    on_window: F,
) -> Result<Stream, CaptureError>
where
    F: FnMut(Vec<f32>) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let (config, sample_format) = pick_input_config(&device, target_rate)?;

    log::info!(
        "Capture config: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let assembler = WindowAssembler::new(
        config.channels as usize,
        config.sample_rate.0,
        target_rate,
        window,
    )?;

    let err_fn = |err| log::error!("Audio input stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => {
            build_input_typed::<i16, F>(&device, &config, assembler, on_window, err_fn)
        }
        SampleFormat::U16 => {
            build_input_typed::<u16, F>(&device, &config, assembler, on_window, err_fn)
        }
        SampleFormat::F32 => {
            build_input_typed::<f32, F>(&device, &config, assembler, on_window, err_fn)
        }
        _ => Err(CaptureError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| CaptureError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok(stream)
}

/// Prefer the default input config; fall back to a known rate with an integer
/// ratio to the capture rate when the default has none.
fn pick_input_config(
    device: &Device,
    target_rate: u32,
) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let default = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;

    if default.sample_rate().0 % target_rate == 0 {
        let sample_format = default.sample_format();
        return Ok((default.into(), sample_format));
    }

    let default_rate = default.sample_rate().0;
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|_| CaptureError::NoSupportedConfig)?
        .collect();

    for &rate in FALLBACK_RATES.iter().filter(|&&r| r % target_rate == 0) {
        for range in &ranges {
            if range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0 {
                let config = range.clone().with_sample_rate(SampleRate(rate));
                let sample_format = config.sample_format();
                return Ok((config.into(), sample_format));
            }
        }
    }

    Err(CaptureError::UnsupportedRate(default_rate))
}

fn build_input_typed<T, F>(
    device: &Device,
    config: &StreamConfig,
    mut assembler: WindowAssembler,
    mut on_window: F,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
    F: FnMut(Vec<f32>) + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                for completed in assembler.push(&scratch) {
                    on_window(completed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_rejects_fractional_ratio() {
        assert!(matches!(
            WindowAssembler::new(1, 44_100, 16_000, 4096),
            Err(CaptureError::UnsupportedRate(44_100))
        ));
    }

    #[test]
    fn assembler_emits_exact_windows() {
        // 48kHz mono -> 16kHz, window of 4: every 12 device samples complete one window.
        let mut assembler = WindowAssembler::new(1, 48_000, 16_000, 4).unwrap();

        let windows = assembler.push(&[0.3; 11]);
        assert!(windows.is_empty());

        let windows = assembler.push(&[0.3; 1]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].len(), 4);
        for &s in &windows[0] {
            assert!((s - 0.3).abs() < 1e-6);
        }
    }

    #[test]
    fn assembler_averages_downsample_groups() {
        // Ratio 3: each output sample is the mean of 3 device samples.
        let mut assembler = WindowAssembler::new(1, 48_000, 16_000, 2).unwrap();
        let windows = assembler.push(&[0.0, 0.3, 0.6, 1.0, 1.0, 1.0]);
        assert_eq!(windows.len(), 1);
        assert!((windows[0][0] - 0.3).abs() < 1e-6);
        assert!((windows[0][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn assembler_folds_stereo_to_mono() {
        // Unit ratio so the mono fold is observable directly.
        let mut assembler = WindowAssembler::new(2, 16_000, 16_000, 2).unwrap();
        let windows = assembler.push(&[1.0, 0.0, -1.0, 0.0]);
        assert_eq!(windows.len(), 1);
        assert!((windows[0][0] - 0.5).abs() < 1e-6);
        assert!((windows[0][1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn assembler_carries_partial_frames_across_batches() {
        let mut assembler = WindowAssembler::new(2, 16_000, 16_000, 1).unwrap();
        // First batch ends mid-frame; the half frame must not be dropped.
        assert!(assembler.push(&[0.8]).is_empty());
        let windows = assembler.push(&[0.4]);
        assert_eq!(windows.len(), 1);
        assert!((windows[0][0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn assembler_emits_multiple_windows_per_batch() {
        let mut assembler = WindowAssembler::new(1, 16_000, 16_000, 2).unwrap();
        let windows = assembler.push(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0], vec![0.1, 0.2]);
        assert_eq!(windows[1], vec![0.3, 0.4]);
        // The odd sample waits for the next batch.
        assert_eq!(assembler.push(&[0.6]).len(), 1);
    }
}
