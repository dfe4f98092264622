//! Wire codec for the live audio session
//!
//! The provider speaks base64-encoded little-endian PCM16; cpal speaks f32
//! frames. Everything in here is a pure conversion between those shapes.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::AudioError;

/// Decode a base64 payload into raw bytes.
///
/// Fails with `AudioError::Decode` if the input is not valid base64.
pub fn decode(text: &str) -> Result<Vec<u8>, AudioError> {
    STANDARD
        .decode(text)
        .map_err(|e| AudioError::Decode(e.to_string()))
}

/// Encode raw bytes as base64. Inverse of [`decode`].
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Interpret a byte buffer as little-endian PCM16 interleaved by channel and
/// rescale each sample to [-1, 1) by dividing by 32768.
///
/// Trailing bytes that do not form a complete interleaved frame are silently
/// dropped (a truncated network payload loses at most one frame).
pub fn bytes_to_frames(bytes: &[u8], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let frame_count = samples.len() / channels;

    samples[..frame_count * channels]
        .iter()
        .map(|&s| s as f32 / 32768.0)
        .collect()
}

/// Convert f32 frames back to little-endian PCM16 bytes.
///
/// Samples are multiplied by 32768 and clamped to the i16 range (the `as`
/// cast saturates); out-of-range inputs therefore clip rather than wrap.
pub fn frames_to_bytes(frames: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames.len() * 2);
    for &frame in frames {
        let sample = (frame * 32768.0) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Convert i16 samples to little-endian bytes (the shape the wire wants).
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Reduce `samples` from `source_rate` to `target_rate` by averaging each
/// group of `source_rate / target_rate` consecutive samples.
///
/// The rates must divide evenly (48 kHz device -> 16 kHz wire is the common
/// case). Anything else, including a zero rate, passes the audio through
/// unchanged so the capture path keeps producing sound at the wrong pitch
/// instead of going silent.
pub fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate == 0 || target_rate == 0 || source_rate % target_rate != 0 {
        tracing::warn!(
            "Cannot resample {} Hz to {} Hz, passing audio through",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let group = (source_rate / target_rate) as usize;

    samples
        .chunks(group)
        .map(|window| {
            let sum: i64 = window.iter().map(|&s| i64::from(s)).sum();
            (sum / window.len() as i64) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let bytes = vec![0u8, 1, 2, 127, 128, 255];
        let text = encode(&bytes);
        assert_eq!(decode(&text).unwrap(), bytes);
    }

    #[test]
    fn test_base64_text_round_trip() {
        // encode(decode(s)) == s for well-formed s
        let text = encode(b"union contract");
        let round = encode(&decode(&text).unwrap());
        assert_eq!(round, text);
    }

    #[test]
    fn test_decode_rejects_invalid_input() {
        let result = decode("not!!valid@@base64");
        assert!(matches!(result, Err(AudioError::Decode(_))));
    }

    #[test]
    fn test_bytes_to_frames_scaling() {
        // 0x4000 = 16384 -> 0.5, 0xC000 = -16384 -> -0.5
        let bytes = vec![0x00, 0x40, 0x00, 0xC0];
        let frames = bytes_to_frames(&bytes, 1);
        assert_eq!(frames, vec![0.5, -0.5]);
    }

    #[test]
    fn test_bytes_to_frames_drops_partial_frame() {
        // 3 samples across 2 channels: the trailing sample is dropped
        let bytes = samples_to_bytes(&[100, 200, 300]);
        let frames = bytes_to_frames(&bytes, 2);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_pcm_round_trip_within_one_lsb() {
        let original = samples_to_bytes(&[0, 1, -1, 1000, -1000, i16::MAX, i16::MIN]);
        let frames = bytes_to_frames(&original, 1);
        let restored = frames_to_bytes(&frames);

        assert_eq!(original.len(), restored.len());
        for (a, b) in original.chunks_exact(2).zip(restored.chunks_exact(2)) {
            let sa = i16::from_le_bytes([a[0], a[1]]) as i32;
            let sb = i16::from_le_bytes([b[0], b[1]]) as i32;
            assert!((sa - sb).abs() <= 1, "sample {} vs {}", sa, sb);
        }
    }

    #[test]
    fn test_frames_to_bytes_clamps_out_of_range() {
        let bytes = frames_to_bytes(&[2.0, -2.0]);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(samples, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_downsample_3x() {
        // 48kHz -> 16kHz (3:1)
        let input = vec![100i16, 200, 300, 400, 500, 600];
        let output = downsample(&input, 48000, 16000);

        assert_eq!(output.len(), 2);
        assert_eq!(output[0], 200); // (100 + 200 + 300) / 3
        assert_eq!(output[1], 500); // (400 + 500 + 600) / 3
    }

    #[test]
    fn test_downsample_same_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_downsample_unsupported_ratio() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 44100, 16000), input);
    }

    #[test]
    fn test_downsample_zero_rate_passes_through() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 0, 16000), input);
        assert_eq!(downsample(&input, 48000, 0), input);
    }
}
