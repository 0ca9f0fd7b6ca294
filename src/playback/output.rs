//! Speaker output on a dedicated audio thread.
//!
//! Mirrors the microphone side: the cpal output stream is not `Send`, so it
//! lives on its own OS thread and is controlled through channels. Decoded
//! samples go into a shared queue that the device callback drains, writing
//! silence on underrun and duplicating the mono signal across the device's
//! channels. If the device refuses the playback rate, the stream opens at
//! double the rate and every sample is pushed twice.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::PlaybackError;

type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

/// Handle to the running output stream and its shared sample queue.
pub struct AudioOutput {
    queue: SampleQueue,
    upsample: usize,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioOutput {
    /// Open the default output device for mono playback at `sample_rate`.
    /// Returns once the stream is running, or with the acquisition error.
    pub fn start(sample_rate: u32) -> Result<Self, PlaybackError> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<usize, PlaybackError>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let callback_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_output_stream(callback_queue, sample_rate) {
                    Ok((stream, upsample)) => {
                        let _ = ready_tx.send(Ok(upsample));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("Output thread exiting");
            })
            .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(upsample)) => Ok(Self {
                queue,
                upsample,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlaybackError::StreamCreationFailed(
                    "output thread exited during setup".to_string(),
                ))
            }
        }
    }

    /// Append decoded samples to the device queue.
    pub fn push(&self, samples: &[i16]) {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.upsample == 1 {
            queue.extend(samples.iter().copied());
        } else {
            for &s in samples {
                for _ in 0..self.upsample {
                    queue.push_back(s);
                }
            }
        }
    }

    /// Drop everything not yet consumed by the device callback.
    pub fn clear(&self) {
        match self.queue.lock() {
            Ok(mut queue) => queue.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Stop the stream and release the output device. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Output thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_output_stream(
    queue: SampleQueue,
    sample_rate: u32,
) -> Result<(Stream, usize), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoOutputDevice)?;

    log::info!("Using audio output device: {:?}", device.name());

    let default = device
        .default_output_config()
        .map_err(|_| PlaybackError::NoSupportedConfig)?;
    let channels = default.channels();
    let sample_format = default.sample_format();

    let mut last_err = None;
    for (upsample, rate) in [(1usize, sample_rate), (2, sample_rate * 2)] {
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        match try_output_stream(&device, &config, sample_format, queue.clone()) {
            Ok(stream) => {
                log::info!(
                    "Playback config: {} Hz, {} channels, {:?} (upsample x{})",
                    rate,
                    channels,
                    sample_format,
                    upsample
                );
                return Ok((stream, upsample));
            }
            Err(e) => {
                log::debug!("Output rate {} Hz rejected: {}", rate, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or(PlaybackError::NoSupportedConfig))
}

fn try_output_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    queue: SampleQueue,
) -> Result<Stream, PlaybackError> {
    let err_fn = |err| log::error!("Audio output stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => build_output_typed::<i16>(device, config, queue, err_fn),
        SampleFormat::U16 => build_output_typed::<u16>(device, config, queue, err_fn),
        SampleFormat::F32 => build_output_typed::<f32>(device, config, queue, err_fn),
        _ => Err(PlaybackError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| PlaybackError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok(stream)
}

fn build_output_typed<T>(
    device: &Device,
    config: &StreamConfig,
    queue: SampleQueue,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    let channels = config.channels as usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = match queue.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0);
                    let value = T::from_sample(sample);
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}
