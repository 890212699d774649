//! Wake word detection
//!
//! Runs every configured model against captured frames through the
//! [`WakeScorer`] capability and resolves threshold crossings with
//! debounce and priority tie-breaking. The scorer is opaque: the default
//! is an energy-envelope heuristic, and tests substitute deterministic
//! fakes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::audio::InputHandle;
use crate::config::WakeConfig;
use crate::{Error, Result};

/// Energy above which a frame counts as speech for the default scorer
const ENERGY_THRESHOLD: f32 = 0.03;

/// Speech needed before a burst can complete
const MIN_SPEECH: Duration = Duration::from_millis(300);

/// Silence that ends a burst
const END_SILENCE: Duration = Duration::from_millis(500);

/// Confidence for one model over the current audio
#[derive(Debug, Clone)]
pub struct ModelScore {
    /// Model identifier
    pub model: String,
    /// Confidence in 0.0..=1.0
    pub score: f32,
}

/// Wake-word inference capability.
///
/// Implementations keep their own feature state across frames; `reset`
/// clears it when a fresh listening phase starts.
pub trait WakeScorer: Send {
    /// Score every configured model against the latest frame.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails; the detector surfaces it as
    /// an inference fault.
    fn score(&mut self, frame: &[i16], sample_rate: u32) -> Result<Vec<ModelScore>>;

    /// Clear accumulated feature state.
    fn reset(&mut self) {}
}

/// A wake trigger.
#[derive(Debug, Clone)]
pub struct WakeEvent {
    /// Identifier of the model that crossed threshold
    pub model: String,
    /// Confidence at the moment of crossing
    pub score: f32,
    /// Trigger time
    pub at: DateTime<Utc>,
}

/// Per-model detection parameters.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Model identifier matched against scorer output
    pub id: String,
    /// Confidence threshold
    pub threshold: f32,
    /// Tie-break rank; lower wins inside one frame
    pub priority: u32,
}

/// Detects wake words on the idle input stream.
pub struct WakeWordDetector {
    models: Vec<ModelSpec>,
    scorer: Box<dyn WakeScorer>,
    debounce: Duration,
    last_trigger: Option<Instant>,
}

impl WakeWordDetector {
    /// Create a detector for the given models.
    ///
    /// Models are evaluated in priority order, so when several cross
    /// threshold inside the same frame the configured rank decides.
    #[must_use]
    pub fn new(mut models: Vec<ModelSpec>, wake: &WakeConfig, scorer: Box<dyn WakeScorer>) -> Self {
        models.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        tracing::debug!(
            models = ?models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            "wake word detector initialized"
        );
        Self {
            models,
            scorer,
            debounce: Duration::from_millis(wake.debounce_ms),
            last_trigger: None,
        }
    }

    /// Number of wake models the detector scores against.
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Consume input frames until a wake phrase crosses threshold.
    ///
    /// Blocks cooperatively on the frame stream. Crossings inside the
    /// debounce window of the previous trigger are ignored so one
    /// utterance cannot fire twice.
    ///
    /// # Errors
    ///
    /// Propagates `Error::Device` from the channel and wraps scorer
    /// failures as `Error::Inference`; the caller retries with backoff.
    pub async fn listen(&mut self, input: &mut InputHandle) -> Result<WakeEvent> {
        self.scorer.reset();
        tracing::info!("listening for wake word");

        loop {
            let frame = input.next_frame().await?;
            let scores = self
                .scorer
                .score(&frame.samples, frame.sample_rate)
                .map_err(|e| Error::Inference(e.to_string()))?;

            let Some((spec, score)) = self.best_crossing(&scores) else {
                continue;
            };

            if let Some(last) = self.last_trigger {
                if last.elapsed() < self.debounce {
                    tracing::trace!(model = %spec.id, score, "trigger inside debounce window");
                    continue;
                }
            }

            let model = spec.id.clone();
            self.last_trigger = Some(Instant::now());
            tracing::info!(model = %model, score, "wake word activated");
            return Ok(WakeEvent {
                model,
                score,
                at: Utc::now(),
            });
        }
    }

    /// Highest-priority model whose score crossed its threshold.
    fn best_crossing(&self, scores: &[ModelScore]) -> Option<(&ModelSpec, f32)> {
        for spec in &self.models {
            let Some(entry) = scores.iter().find(|s| s.model == spec.id) else {
                continue;
            };
            if entry.score > spec.threshold {
                return Some((spec, entry.score));
            }
            if entry.score > 0.01 {
                tracing::trace!(model = %spec.id, score = entry.score, "below threshold");
            }
        }
        None
    }
}

/// State of the energy-envelope scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BurstState {
    /// Waiting for speech
    Idle,
    /// Accumulating a candidate burst
    Listening,
}

/// Default scorer: a bounded speech burst followed by silence counts as a
/// wake utterance for every model at once; priority order then picks the
/// model. Replace through [`WakeScorer`] for real per-phrase inference.
pub struct EnergyScorer {
    models: Vec<String>,
    energy_threshold: f32,
    max_window: Duration,
    state: BurstState,
    speech_samples: usize,
    silence_samples: usize,
    total_samples: usize,
}

impl EnergyScorer {
    /// Create a scorer reporting the given model identifiers.
    #[must_use]
    pub fn new(models: Vec<String>, wake: &WakeConfig) -> Self {
        Self {
            models,
            energy_threshold: ENERGY_THRESHOLD,
            max_window: Duration::from_millis(wake.window_ms),
            state: BurstState::Idle,
            speech_samples: 0,
            silence_samples: 0,
            total_samples: 0,
        }
    }

    fn samples_for(rate: u32, duration: Duration) -> usize {
        (rate as usize) * usize::try_from(duration.as_millis()).unwrap_or(0) / 1000
    }
}

impl WakeScorer for EnergyScorer {
    fn score(&mut self, frame: &[i16], sample_rate: u32) -> Result<Vec<ModelScore>> {
        let energy = rms(frame);
        let is_speech = energy > self.energy_threshold;

        let mut confidence = 0.0f32;
        match self.state {
            BurstState::Idle => {
                if is_speech {
                    self.state = BurstState::Listening;
                    self.speech_samples = frame.len();
                    self.silence_samples = 0;
                    self.total_samples = frame.len();
                    tracing::trace!(energy, "speech burst started");
                }
            }
            BurstState::Listening => {
                self.total_samples += frame.len();
                if is_speech {
                    self.speech_samples += frame.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame.len();
                }

                let min_speech = Self::samples_for(sample_rate, MIN_SPEECH);
                let end_silence = Self::samples_for(sample_rate, END_SILENCE);
                let max_samples = Self::samples_for(sample_rate, self.max_window);

                if self.silence_samples >= end_silence {
                    if self.speech_samples >= min_speech {
                        confidence = 1.0;
                    } else {
                        tracing::trace!("burst too short, discarding");
                    }
                    self.reset();
                } else if self.total_samples > max_samples + end_silence {
                    tracing::trace!("burst too long, resetting");
                    self.reset();
                }
            }
        }

        Ok(self
            .models
            .iter()
            .map(|m| ModelScore {
                model: m.clone(),
                score: confidence,
            })
            .collect())
    }

    fn reset(&mut self) {
        self.state = BurstState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;
        self.total_samples = 0;
    }
}

/// RMS energy of PCM16 samples normalized to 0.0..=1.0
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / f64::from(i16::MAX);
            v * v
        })
        .sum();
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let value = (sum / samples.len() as f64).sqrt() as f32;
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioChannel, AudioFrame, Consumer};
    use crate::config::AudioSettings;

    struct ScriptScorer {
        scripted: Vec<Vec<ModelScore>>,
        cursor: usize,
    }

    impl WakeScorer for ScriptScorer {
        fn score(&mut self, _frame: &[i16], _rate: u32) -> Result<Vec<ModelScore>> {
            let scores = self
                .scripted
                .get(self.cursor)
                .cloned()
                .unwrap_or_default();
            self.cursor += 1;
            Ok(scores)
        }
    }

    fn spec(id: &str, priority: u32) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            threshold: 0.5,
            priority,
        }
    }

    fn score(model: &str, value: f32) -> ModelScore {
        ModelScore {
            model: model.to_string(),
            score: value,
        }
    }

    fn loud_frame(rate: u32, ms: u64) -> AudioFrame {
        let len = (rate as usize) * usize::try_from(ms).unwrap() / 1000;
        AudioFrame::new(vec![12_000; len], rate)
    }

    fn quiet_frame(rate: u32, ms: u64) -> AudioFrame {
        let len = (rate as usize) * usize::try_from(ms).unwrap() / 1000;
        AudioFrame::silence(len, rate)
    }

    #[tokio::test]
    async fn priority_breaks_same_frame_tie() {
        let detector_models = vec![spec("en_model", 1), spec("ko_model", 0)];
        let scorer = ScriptScorer {
            scripted: vec![vec![score("en_model", 0.9), score("ko_model", 0.8)]],
            cursor: 0,
        };
        let mut detector = WakeWordDetector::new(
            detector_models,
            &WakeConfig::default(),
            Box::new(scorer),
        );

        let channel = AudioChannel::new(&AudioSettings::default());
        let mut input = channel.acquire_input(Consumer::WakeDetector).unwrap();
        channel.feed(quiet_frame(24_000, 30));

        let event = detector.listen(&mut input).await.unwrap();
        assert_eq!(event.model, "ko_model");
    }

    #[tokio::test]
    async fn debounce_suppresses_repeat_trigger() {
        let scripted = vec![
            vec![score("m", 0.9)],
            vec![score("m", 0.9)],
            vec![score("m", 0.0)],
        ];
        let scorer = ScriptScorer {
            scripted,
            cursor: 0,
        };
        let wake = WakeConfig {
            debounce_ms: 60_000,
            ..WakeConfig::default()
        };
        let mut detector =
            WakeWordDetector::new(vec![spec("m", 0)], &wake, Box::new(scorer));

        let channel = AudioChannel::new(&AudioSettings::default());
        let mut input = channel.acquire_input(Consumer::WakeDetector).unwrap();
        channel.feed(quiet_frame(24_000, 30));
        let first = detector.listen(&mut input).await.unwrap();
        assert_eq!(first.model, "m");

        // Second crossing lands inside the debounce window; the detector
        // must keep waiting rather than trigger again
        channel.feed(quiet_frame(24_000, 30));
        channel.feed(quiet_frame(24_000, 30));
        let pending = detector.listen(&mut input);
        let raced = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn device_fault_propagates_from_listen() {
        let scorer = ScriptScorer {
            scripted: vec![],
            cursor: 0,
        };
        let mut detector = WakeWordDetector::new(
            vec![spec("m", 0)],
            &WakeConfig::default(),
            Box::new(scorer),
        );
        let channel = AudioChannel::new(&AudioSettings::default());
        let mut input = channel.acquire_input(Consumer::WakeDetector).unwrap();
        channel.fault("hardware unplugged");
        let err = detector.listen(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn energy_scorer_completes_burst() {
        let wake = WakeConfig::default();
        let mut scorer = EnergyScorer::new(vec!["m".to_string()], &wake);
        let rate = 24_000;

        // 400ms of speech
        for _ in 0..14 {
            let scores = scorer.score(&loud_frame(rate, 30).samples, rate).unwrap();
            assert!(scores[0].score < 0.5);
        }
        // 500ms of silence completes the burst
        let mut fired = false;
        for _ in 0..20 {
            let scores = scorer.score(&quiet_frame(rate, 30).samples, rate).unwrap();
            if scores[0].score > 0.5 {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }

    #[test]
    fn energy_scorer_ignores_short_blips() {
        let wake = WakeConfig::default();
        let mut scorer = EnergyScorer::new(vec!["m".to_string()], &wake);
        let rate = 24_000;

        // 60ms blip, then silence: never enough speech
        for _ in 0..2 {
            scorer.score(&loud_frame(rate, 30).samples, rate).unwrap();
        }
        for _ in 0..40 {
            let scores = scorer.score(&quiet_frame(rate, 30).samples, rate).unwrap();
            assert!(scores[0].score < 0.5);
        }
    }

    #[test]
    fn rms_distinguishes_silence_from_speech() {
        assert!(rms(&[0i16; 100]) < 0.001);
        assert!(rms(&[12_000i16; 100]) > 0.3);
    }
}
