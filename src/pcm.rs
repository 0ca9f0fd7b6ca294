//! PCM sample codec for the live wire format.
//!
//! The live channel carries audio as little-endian 16-bit signed PCM in both
//! directions. Capture produces `f32` samples in `[-1.0, 1.0]`; this module
//! quantizes them for the wire and decodes inbound payloads back to `i16`
//! for playback. Pure functions, no I/O, no shared state.

/// Errors produced while decoding an inbound PCM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    /// Payload length is not a multiple of two bytes.
    OddLength(usize),
}

impl std::fmt::Display for PcmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcmError::OddLength(len) => {
                write!(f, "PCM16 payload has odd byte length {}", len)
            }
        }
    }
}

impl std::error::Error for PcmError {}

/// Quantize one float sample to a 16-bit signed value.
///
/// Linear scale by 32768 with clamping, so the full float range maps onto the
/// representable extremes: `1.5` clamps to `i16::MAX`, `-2.0` to `i16::MIN`.
/// NaN saturates to 0 through the float-to-int cast.
pub fn quantize(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode float samples as little-endian PCM16 bytes.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| quantize(s).to_le_bytes())
        .collect()
}

/// Decode little-endian PCM16 bytes into samples.
///
/// Exact inverse of [`encode`] around the quantized values. Odd-length input
/// is malformed and rejected rather than truncated.
pub fn decode(bytes: &[u8]) -> Result<Vec<i16>, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_scales_linearly() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16384);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(-1.0), i16::MIN);
    }

    #[test]
    fn quantize_clamps_out_of_range_input() {
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(1.5), i16::MAX);
        assert_eq!(quantize(100.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
        assert_eq!(quantize(-100.0), i16::MIN);
    }

    #[test]
    fn quantize_handles_nan() {
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn encode_emits_little_endian_pairs() {
        // 0x1234 little-endian is [0x34, 0x12]
        let bytes = encode(&[0x1234 as f32 / 32768.0]);
        assert_eq!(bytes, vec![0x34, 0x12]);
    }

    #[test]
    fn decode_reads_little_endian_pairs() {
        let samples = decode(&[0x34, 0x12, 0x00, 0x80]).unwrap();
        assert_eq!(samples, vec![0x1234, i16::MIN]);
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert_eq!(decode(&[0x01, 0x02, 0x03]), Err(PcmError::OddLength(3)));
        assert!(decode(&[0x01, 0x02, 0x03]).unwrap_err().to_string().contains("odd"));
    }

    #[test]
    fn decode_accepts_empty_payload() {
        assert_eq!(decode(&[]).unwrap(), Vec::<i16>::new());
    }

    #[test]
    fn round_trip_reproduces_quantized_values() {
        let samples: Vec<f32> = (-20..=20).map(|i| i as f32 / 10.0).collect();
        let expected: Vec<i16> = samples.iter().map(|&s| quantize(s)).collect();
        let decoded = decode(&encode(&samples)).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn round_trip_survives_extremes() {
        let samples = [1.5, -2.0, 1.0, -1.0, 0.0];
        let decoded = decode(&encode(&samples)).unwrap();
        assert_eq!(
            decoded,
            vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN, 0]
        );
    }
}
