//! Fixed-duration PCM frames

use std::time::Duration;

use crate::{Error, Result};

/// A fixed-duration block of mono PCM16 samples.
///
/// Produced by the input stream, consumed exactly once by whichever
/// component holds the active input role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Interleaved samples (mono, so one per instant)
    pub samples: Vec<i16>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (always 1 for captured audio)
    pub channels: u16,
}

impl AudioFrame {
    /// Create a mono frame.
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// A frame of silence with the given sample count.
    #[must_use]
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; len], sample_rate)
    }

    /// Frame duration derived from sample count and rate.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(
            (self.samples.len() as u64) * 1_000_000 / u64::from(self.sample_rate),
        )
    }

    /// Root-mean-square energy normalized to 0.0..=1.0.
    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = f64::from(s) / f64::from(i16::MAX);
                v * v
            })
            .sum();
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let rms = (sum / self.samples.len() as f64).sqrt() as f32;
        rms
    }
}

/// Encode PCM16 samples as little-endian bytes for the wire.
#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes into PCM16 samples.
///
/// # Errors
///
/// Returns `Error::Protocol` if the byte count is odd, since a torn
/// sample means the chunk header lied about its payload.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "audio chunk has odd byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode PCM16 samples as WAV bytes (mono, 16-bit).
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Device(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Device(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Device(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        let frame = AudioFrame::silence(720, 24_000);
        assert!(frame.rms() < f32::EPSILON);
    }

    #[test]
    fn rms_of_full_scale_square_is_near_one() {
        let samples: Vec<i16> = (0..720)
            .map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX })
            .collect();
        let frame = AudioFrame::new(samples, 24_000);
        assert!(frame.rms() > 0.99);
    }

    #[test]
    fn duration_matches_rate() {
        let frame = AudioFrame::silence(720, 24_000);
        assert_eq!(frame.duration(), Duration::from_millis(30));
    }

    #[test]
    fn pcm16_bytes_round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = pcm16_to_bytes(&samples);
        assert_eq!(bytes_to_pcm16(&bytes).unwrap(), samples);
    }

    #[test]
    fn odd_byte_count_is_a_protocol_fault() {
        assert!(bytes_to_pcm16(&[0, 1, 2]).is_err());
    }

    #[test]
    fn wav_encoding_produces_riff_header() {
        let wav = samples_to_wav(&[0i16; 100], 24_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
