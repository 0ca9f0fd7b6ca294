//! Virtual-clock buffer scheduling.
//!
//! The scheduler owns two pieces of state: `next_start`, the end time of the
//! last scheduled buffer on the playback stream's clock, and the active set of
//! buffers that have been scheduled but have not ended yet, keyed by a
//! monotonically increasing id. Only the playback worker touches either, so
//! the whole thing is single-threaded and lock-free.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Time source for scheduling decisions, measured from the playback stream's
/// epoch. Injected so scheduling is testable without a device.
pub trait PlaybackClock {
    fn now(&self) -> Duration;
}

/// Wall clock anchored at stream start.
pub struct StreamClock {
    epoch: Instant,
}

impl StreamClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl PlaybackClock for StreamClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Outcome of scheduling one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub id: u64,
    pub start_at: Duration,
    pub end_at: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSource {
    start_at: Duration,
    end_at: Duration,
}

/// Exact duration of `sample_count` mono samples at `sample_rate`.
pub fn buffer_duration(sample_count: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos((sample_count as u64) * 1_000_000_000 / sample_rate.max(1) as u64)
}

pub struct PlaybackScheduler<C> {
    clock: C,
    next_start: Duration,
    active: BTreeMap<u64, ActiveSource>,
    next_id: u64,
    stopped: bool,
}

impl<C: PlaybackClock> PlaybackScheduler<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            next_start: Duration::ZERO,
            active: BTreeMap::new(),
            next_id: 0,
            stopped: false,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Schedule the next buffer: starts at `max(next_start, now)`, never in
    /// the past and never overlapping the previous buffer. Returns `None`
    /// after [`stop`](Self::stop); late buffers are dropped, not played.
    pub fn schedule(&mut self, duration: Duration) -> Option<Scheduled> {
        if self.stopped {
            return None;
        }

        let start_at = self.next_start.max(self.clock.now());
        let end_at = start_at + duration;
        self.next_start = end_at;

        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, ActiveSource { start_at, end_at });

        Some(Scheduled {
            id,
            start_at,
            end_at,
        })
    }

    /// Remove a buffer on its natural end. Returns false for ids already
    /// cleared by an interruption.
    pub fn finish(&mut self, id: u64) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Stop everything currently active and reset the virtual clock to its
    /// start, so buffers following the interruption inherit no stale
    /// scheduling state. Returns the stopped ids.
    pub fn interrupt(&mut self) -> Vec<u64> {
        let stopped: Vec<u64> = self.active.keys().copied().collect();
        self.active.clear();
        self.next_start = Duration::ZERO;
        stopped
    }

    /// Terminal teardown: like an interruption, but every later `schedule`
    /// call is refused.
    pub fn stop(&mut self) -> Vec<u64> {
        self.stopped = true;
        self.interrupt()
    }

    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
