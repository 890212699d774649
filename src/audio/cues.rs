//! Session boundary sound cues
//!
//! Short WAV clips played when the device wakes, commits an utterance, or
//! says goodbye. Cues are best-effort: a missing file, a busy output role,
//! or a playback error never disturbs the session flow.

use std::path::Path;

use crate::config::{AudioSettings, SoundConfig};
use crate::{Error, Result};

use super::channel::{AudioChannel, Consumer};
use super::device::StreamResampler;
use super::frame::AudioFrame;

/// Which cue to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Wake trigger acknowledged
    Awake,
    /// Utterance committed to the peer
    Sent,
    /// Session over
    Bye,
}

impl std::fmt::Display for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Awake => write!(f, "awake"),
            Self::Sent => write!(f, "sent"),
            Self::Bye => write!(f, "bye"),
        }
    }
}

/// Preloaded cue clips, already converted to the channel sample rate.
pub struct SoundBank {
    awake: Option<Vec<i16>>,
    sent: Option<Vec<i16>>,
    bye: Option<Vec<i16>>,
    sample_rate: u32,
    frame_samples: usize,
}

impl SoundBank {
    /// Load the configured cue files. Missing or unreadable files are
    /// logged and skipped; loading never fails.
    #[must_use]
    pub fn load(sounds: &SoundConfig, settings: &AudioSettings) -> Self {
        let load_one = |name: &str, path: &Option<std::path::PathBuf>| {
            let path = path.as_ref()?;
            match load_clip(path, settings.sample_rate) {
                Ok(samples) => {
                    tracing::debug!(cue = name, path = %path.display(), "cue loaded");
                    Some(samples)
                }
                Err(e) => {
                    tracing::warn!(
                        cue = name,
                        path = %path.display(),
                        error = %e,
                        "cue unavailable"
                    );
                    None
                }
            }
        };

        Self {
            awake: load_one("awake", &sounds.awake),
            sent: load_one("sent", &sounds.sent),
            bye: load_one("bye", &sounds.bye),
            sample_rate: settings.sample_rate,
            frame_samples: settings.frame_samples(),
        }
    }

    /// An empty bank (all cues skipped).
    #[must_use]
    pub fn empty(settings: &AudioSettings) -> Self {
        Self {
            awake: None,
            sent: None,
            bye: None,
            sample_rate: settings.sample_rate,
            frame_samples: settings.frame_samples(),
        }
    }

    fn clip(&self, cue: Cue) -> Option<&Vec<i16>> {
        match cue {
            Cue::Awake => self.awake.as_ref(),
            Cue::Sent => self.sent.as_ref(),
            Cue::Bye => self.bye.as_ref(),
        }
    }

    /// Whether a clip is loaded for this cue.
    #[must_use]
    pub fn has(&self, cue: Cue) -> bool {
        self.clip(cue).is_some()
    }

    /// Cue clip chunked into channel-rate frames.
    ///
    /// Lets a consumer that already holds the output role (the session,
    /// for the sent cue) mix the clip into its own sink instead of
    /// competing for the cue role. Empty when no clip is loaded.
    #[must_use]
    pub fn frames(&self, cue: Cue) -> Vec<AudioFrame> {
        self.clip(cue).map_or_else(Vec::new, |samples| {
            samples
                .chunks(self.frame_samples)
                .map(|chunk| AudioFrame::new(chunk.to_vec(), self.sample_rate))
                .collect()
        })
    }

    /// Play a cue through the channel and wait for it to finish.
    ///
    /// Skips silently when no clip is loaded and backs off when another
    /// consumer holds the output role.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device faults mid-playback.
    pub async fn play(&self, channel: &AudioChannel, cue: Cue) -> Result<()> {
        let Some(samples) = self.clip(cue) else {
            tracing::debug!(cue = %cue, "no clip configured, skipping");
            return Ok(());
        };

        let output = match channel.acquire_output(Consumer::Cue) {
            Ok(handle) => handle,
            Err(Error::Busy(holder)) => {
                tracing::debug!(cue = %cue, holder, "output busy, skipping cue");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for chunk in samples.chunks(self.frame_samples) {
            output.write(AudioFrame::new(chunk.to_vec(), self.sample_rate))?;
        }
        output.drained().await
    }
}

/// Read a WAV file, mix to mono, and resample to the channel rate.
fn load_clip(path: &Path, target_rate: u32) -> Result<Vec<i16>> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| Error::Device(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let floats: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Device(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max = f32::from(i16::MAX);
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Device(e.to_string()))?
        }
    };

    let mut mono: Vec<f32> = Vec::with_capacity(floats.len() / channels);
    for chunk in floats.chunks(channels) {
        #[allow(clippy::cast_precision_loss)]
        let avg = chunk.iter().sum::<f32>() / chunk.len() as f32;
        mono.push(avg);
    }

    let converted = if spec.sample_rate == target_rate {
        mono
    } else {
        let mut resampler = StreamResampler::new(spec.sample_rate, target_rate)?;
        let mut out = Vec::new();
        resampler.push(&mono, &mut out)?;
        // Flush the sub-chunk remainder with silence
        resampler.push(&[0.0; 2048], &mut out)?;
        out
    };

    #[allow(clippy::cast_possible_truncation)]
    Ok(converted
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect())
}
