//! PCM16 <-> float conversion and the base64 wire encoding used by the live service.
//!
//! - Outbound: f32 samples → clamp/round → i16 little-endian → base64 text
//! - Inbound:  base64 text → bytes → i16 little-endian → f32 samples

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::AudioError;

/// Full-scale divisor for 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// A block of decoded or captured samples.
///
/// Samples are interleaved when `channels > 1`. Consumed once by the next stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self { sample_rate, channels, samples }
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Channel-averaged sample at `frame`, or silence past the end.
    pub fn mono_sample(&self, frame: usize) -> f32 {
        let ch = self.channels as usize;
        if ch == 0 {
            return 0.0;
        }
        let start = frame * ch;
        match self.samples.get(start..start + ch) {
            Some(s) if ch == 1 => s[0],
            Some(s) => s.iter().sum::<f32>() / ch as f32,
            None => 0.0,
        }
    }
}

/// Quantize one float sample to PCM16. NaN becomes silence, infinities clamp.
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Encode float samples into the base64 PCM16LE blob carried by `realtimeInput`.
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&f32_to_i16(s).to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Undo the transport encoding of a wire blob.
pub fn decode_bytes(blob: &str) -> Result<Vec<u8>, AudioError> {
    STANDARD
        .decode(blob.trim())
        .map_err(|e| AudioError::MalformedPayload(e.to_string()))
}

/// Read raw bytes as interleaved PCM16LE and convert to floats.
pub fn decode_audio_segment(
    raw: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioFrame, AudioError> {
    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "invalid layout: {} Hz, {} channels",
            sample_rate, channels
        )));
    }
    let block = 2 * channels as usize;
    if raw.len() % block != 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{} bytes is not a multiple of {} bytes per frame",
            raw.len(),
            block
        )));
    }

    let samples = raw
        .chunks_exact(2)
        .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect();

    Ok(AudioFrame::new(sample_rate, channels, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / 32768.0;

    #[test]
    fn encode_then_decode_stays_within_quantization_step() {
        let samples: Vec<f32> = (0..1000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .chain([-1.0, 1.0, 0.0, 0.5, -0.5, 1.0 - STEP / 3.0])
            .collect();

        let raw = decode_bytes(&encode(&samples)).unwrap();
        let frame = decode_audio_segment(&raw, 16000, 1).unwrap();

        assert_eq!(frame.samples.len(), samples.len());
        for (orig, got) in samples.iter().zip(&frame.samples) {
            assert!((orig - got).abs() <= STEP + f32::EPSILON, "{} vs {}", orig, got);
        }
    }

    #[test]
    fn out_of_range_and_non_finite_samples_are_clamped() {
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(-7.0), i16::MIN);
        assert_eq!(f32_to_i16(f32::INFINITY), i16::MAX);
        assert_eq!(f32_to_i16(f32::NEG_INFINITY), i16::MIN);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    #[test]
    fn encode_is_little_endian() {
        let raw = decode_bytes(&encode(&[0.5])).unwrap();
        assert_eq!(raw, 16384i16.to_le_bytes().to_vec());
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let err = decode_bytes("not*base64!").unwrap_err();
        assert!(matches!(err, AudioError::MalformedPayload(_)));
    }

    #[test]
    fn odd_byte_counts_are_unsupported() {
        let err = decode_audio_segment(&[0, 1, 2], 24000, 1).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedFormat(_)));

        // 6 bytes is three mono samples but not whole stereo frames
        let err = decode_audio_segment(&[0; 6], 24000, 2).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedFormat(_)));

        assert!(decode_audio_segment(&[0; 4], 24000, 0).is_err());
    }

    #[test]
    fn duration_counts_frames_per_channel() {
        let frame = decode_audio_segment(&vec![0u8; 48000], 24000, 1).unwrap();
        assert!((frame.duration() - 1.0).abs() < 1e-9);

        let stereo = decode_audio_segment(&vec![0u8; 48000], 24000, 2).unwrap();
        assert!((stereo.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mono_sample_averages_channels() {
        let frame = AudioFrame::new(24000, 2, vec![0.5, -0.25, 1.0, 1.0]);
        assert_eq!(frame.mono_sample(0), 0.125);
        assert_eq!(frame.mono_sample(1), 1.0);
        assert_eq!(frame.mono_sample(2), 0.0);
    }
}
