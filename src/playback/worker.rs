//! Playback worker: ordered decode, schedule, and interruption handling.
//!
//! One tokio task owns the scheduler and the device sink. Commands arrive on a
//! FIFO channel, so chunks schedule in exactly the order the session received
//! them and an interruption flushes everything queued before it. Each buffer's
//! natural end is a timer that reports back into the same task.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::sync::mpsc;

use super::scheduler::{buffer_duration, PlaybackClock, PlaybackScheduler, StreamClock};
use super::{AudioOutput, PlaybackError};
use crate::pcm;

/// Destination for decoded samples. The production impl is the device-backed
/// [`AudioOutput`]; tests substitute a recorder.
pub trait PlaybackSink: Send + 'static {
    fn push(&mut self, samples: &[i16]);
    fn clear(&mut self);
}

impl PlaybackSink for AudioOutput {
    fn push(&mut self, samples: &[i16]) {
        AudioOutput::push(self, samples);
    }

    fn clear(&mut self) {
        AudioOutput::clear(self);
    }
}

enum Command {
    /// Base64 PCM16 payload, in message-arrival order.
    Play { data: String },
    Interrupt,
    Shutdown,
}

/// Handle to the playback worker. Dropping it (or `shutdown`) stops playback;
/// the device itself is released when the worker exits.
pub struct PlaybackHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl PlaybackHandle {
    /// Acquire the output device and spawn the worker. Must be called within
    /// a tokio runtime.
    pub fn start(sample_rate: u32) -> Result<Self, PlaybackError> {
        let output = AudioOutput::start(sample_rate)?;
        Ok(Self::with_sink(output, sample_rate))
    }

    fn with_sink<S: PlaybackSink>(sink: S, sample_rate: u32) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_playback(sink, sample_rate, cmd_rx));
        Self { cmd_tx }
    }

    /// Queue one inbound chunk for scheduled playback.
    pub fn enqueue(&self, data: String) {
        let _ = self.cmd_tx.send(Command::Play { data });
    }

    /// Stop all active buffers, flush the queue, reset the virtual clock.
    pub fn interrupt(&self) {
        let _ = self.cmd_tx.send(Command::Interrupt);
    }

    /// Flush and release the output device.
    pub fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

async fn run_playback<S: PlaybackSink>(
    mut sink: S,
    sample_rate: u32,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut scheduler = PlaybackScheduler::new(StreamClock::start());
    // Buffer-end timers report back on their own channel; holding one sender
    // here keeps the branch alive even with no timers outstanding.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();

    log::debug!("Playback worker started ({} Hz)", sample_rate);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Play { data }) => {
                    play_chunk(&mut sink, &mut scheduler, sample_rate, &data, &done_tx);
                }
                Some(Command::Interrupt) => {
                    sink.clear();
                    let stopped = scheduler.interrupt();
                    log::info!("Playback interrupted: {} active buffer(s) stopped", stopped.len());
                }
                Some(Command::Shutdown) | None => break,
            },
            Some(id) = done_rx.recv() => {
                if scheduler.finish(id) {
                    log::debug!("Playback buffer {} ended", id);
                }
            }
        }
    }

    scheduler.stop();
    sink.clear();
    log::debug!("Playback worker stopped");
}

fn play_chunk<S: PlaybackSink, C: PlaybackClock>(
    sink: &mut S,
    scheduler: &mut PlaybackScheduler<C>,
    sample_rate: u32,
    data: &str,
    done_tx: &mpsc::UnboundedSender<u64>,
) {
    let bytes = match STANDARD.decode(data.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Dropping malformed audio chunk (base64): {}", e);
            return;
        }
    };

    let samples = match pcm::decode(&bytes) {
        Ok(samples) => samples,
        Err(e) => {
            log::warn!("Dropping malformed audio chunk: {}", e);
            return;
        }
    };

    if samples.is_empty() {
        return;
    }

    let duration = buffer_duration(samples.len(), sample_rate);
    let Some(scheduled) = scheduler.schedule(duration) else {
        log::debug!("Playback stopped; dropping late chunk");
        return;
    };

    sink.push(&samples);

    let delay = scheduled.end_at.saturating_sub(scheduler.clock().now());
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = done_tx.send(scheduled.id);
    });

    log::debug!(
        "Scheduled buffer {}: {} samples at {:?}",
        scheduled.id,
        samples.len(),
        scheduled.start_at
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    enum SinkEvent {
        Pushed(Vec<i16>),
        Cleared,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<SinkEvent>>>,
    }

    impl PlaybackSink for RecordingSink {
        fn push(&mut self, samples: &[i16]) {
            self.events
                .lock()
                .unwrap()
                .push(SinkEvent::Pushed(samples.to_vec()));
        }

        fn clear(&mut self) {
            self.events.lock().unwrap().push(SinkEvent::Cleared);
        }
    }

    fn chunk_of(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    async fn run_script(commands: Vec<Command>) -> Vec<SinkEvent> {
        let sink = RecordingSink::default();
        let events = sink.events.clone();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        for command in commands {
            cmd_tx.send(command).unwrap();
        }
        cmd_tx.send(Command::Shutdown).unwrap();

        run_playback(sink, 24_000, cmd_rx).await;
        let events = events.lock().unwrap().clone();
        events
    }

    #[tokio::test]
    async fn chunks_reach_the_sink_in_arrival_order() {
        let events = run_script(vec![
            Command::Play {
                data: chunk_of(&[1, 2, 3]),
            },
            Command::Play {
                data: chunk_of(&[4, 5]),
            },
        ])
        .await;

        // Final Cleared comes from shutdown teardown.
        assert_eq!(
            events,
            vec![
                SinkEvent::Pushed(vec![1, 2, 3]),
                SinkEvent::Pushed(vec![4, 5]),
                SinkEvent::Cleared,
            ]
        );
    }

    #[tokio::test]
    async fn malformed_chunks_never_reach_the_sink() {
        let events = run_script(vec![
            Command::Play {
                data: "not base64!!!".to_string(),
            },
            Command::Play {
                // Valid base64, odd byte count.
                data: STANDARD.encode([0x01, 0x02, 0x03]),
            },
        ])
        .await;

        assert_eq!(events, vec![SinkEvent::Cleared]);
    }

    #[tokio::test]
    async fn interrupt_flushes_between_chunks() {
        let events = run_script(vec![
            Command::Play {
                data: chunk_of(&[7; 240]),
            },
            Command::Interrupt,
            Command::Play {
                data: chunk_of(&[9]),
            },
        ])
        .await;

        assert_eq!(
            events,
            vec![
                SinkEvent::Pushed(vec![7; 240]),
                SinkEvent::Cleared,
                SinkEvent::Pushed(vec![9]),
                SinkEvent::Cleared,
            ]
        );
    }

    #[tokio::test]
    async fn empty_chunk_is_a_no_op() {
        let events = run_script(vec![Command::Play {
            data: chunk_of(&[]),
        }])
        .await;
        assert_eq!(events, vec![SinkEvent::Cleared]);
    }
}
