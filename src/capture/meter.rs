//! Amplitude meter driving the capture volume visualization.
//!
//! Each capture window reduces to its mean absolute value; ten indicator bars
//! are derived from that scalar, each carrying its own random jitter stream so
//! the bars move independently instead of in lockstep. One update per window.

/// Number of indicator bars.
pub const METER_BARS: usize = 10;

/// Per-bar jitter as a fraction of the window level (±25%).
const JITTER_SPREAD: f32 = 0.25;

/// One amplitude observation: ten values in `[0, 1]`.
pub type AmplitudeBars = [f32; METER_BARS];

/// Minimal xorshift64 generator, one per bar. The bars only need cheap
/// decorrelated noise, not a full RNG dependency.
#[derive(Debug, Clone)]
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self {
            // xorshift has a fixed point at zero
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        s
    }

    /// Next value in `[0, 1)`.
    fn next_unit(&mut self) -> f32 {
        (self.next() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Mean absolute value of a window, in `[0, 1]` for well-formed capture input.
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Derives the per-window bar vector from capture windows.
pub struct AmplitudeMeter {
    jitter: [Xorshift64; METER_BARS],
}

impl AmplitudeMeter {
    /// Meter with deterministic jitter streams, for tests and reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        let jitter = std::array::from_fn(|bar| {
            let stream = (bar as u64 + 1).wrapping_mul(0xA076_1D64_78BD_642F);
            let mut rng = Xorshift64::new(seed.wrapping_add(stream));
            rng.next();
            rng
        });
        Self { jitter }
    }

    /// Consume one capture window and produce the next bar vector.
    ///
    /// Every bar is the window's mean absolute level scaled by an independent
    /// jitter factor in `[1 - JITTER_SPREAD, 1 + JITTER_SPREAD]`, clamped to
    /// `[0, 1]`. Silence yields all zeros.
    pub fn update(&mut self, samples: &[f32]) -> AmplitudeBars {
        let level = mean_abs(samples);
        let mut bars = [0.0f32; METER_BARS];
        for (bar, rng) in bars.iter_mut().zip(self.jitter.iter_mut()) {
            let factor = 1.0 + JITTER_SPREAD * (2.0 * rng.next_unit() - 1.0);
            *bar = (level * factor).clamp(0.0, 1.0);
        }
        bars
    }
}

impl Default for AmplitudeMeter {
    fn default() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0x5EED);
        Self::with_seed(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_yields_zero_bars() {
        let mut meter = AmplitudeMeter::with_seed(7);
        let bars = meter.update(&[0.0; 4096]);
        assert_eq!(bars, [0.0; METER_BARS]);
    }

    #[test]
    fn empty_window_yields_zero_bars() {
        let mut meter = AmplitudeMeter::with_seed(7);
        assert_eq!(meter.update(&[]), [0.0; METER_BARS]);
    }

    #[test]
    fn bars_track_window_level_within_jitter_spread() {
        let mut meter = AmplitudeMeter::with_seed(42);
        let window = vec![0.4f32; 4096];
        let level = mean_abs(&window);
        assert!((level - 0.4).abs() < 1e-6);

        let bars = meter.update(&window);
        for &bar in &bars {
            assert!(bar >= level * (1.0 - JITTER_SPREAD) - 1e-6);
            assert!(bar <= level * (1.0 + JITTER_SPREAD) + 1e-6);
        }
    }

    #[test]
    fn bars_are_clamped_for_loud_input() {
        let mut meter = AmplitudeMeter::with_seed(42);
        let bars = meter.update(&vec![1.0f32; 512]);
        for &bar in &bars {
            assert!(bar <= 1.0);
            assert!(bar >= 1.0 - JITTER_SPREAD);
        }
    }

    #[test]
    fn mean_abs_uses_absolute_values() {
        let level = mean_abs(&[0.5, -0.5, 0.25, -0.25]);
        assert!((level - 0.375).abs() < 1e-6);
    }

    #[test]
    fn bars_move_independently() {
        let mut meter = AmplitudeMeter::with_seed(1);
        let window = vec![0.5f32; 256];
        // Across a few updates, at least one pair of bars must disagree;
        // identical streams would move every bar in lockstep.
        let mut saw_difference = false;
        for _ in 0..4 {
            let bars = meter.update(&window);
            if bars.windows(2).any(|pair| (pair[0] - pair[1]).abs() > 1e-6) {
                saw_difference = true;
            }
        }
        assert!(saw_difference);
    }

    #[test]
    fn same_seed_reproduces_the_sequence() {
        let mut a = AmplitudeMeter::with_seed(99);
        let mut b = AmplitudeMeter::with_seed(99);
        let window = vec![0.3f32; 128];
        assert_eq!(a.update(&window), b.update(&window));
        assert_eq!(a.update(&window), b.update(&window));
    }
}
