//! Configuration management for the Hearth companion
//!
//! Configuration is a YAML snapshot read once at startup: profiles, wake
//! models, session tuning, endpoints, and audio settings. Environment
//! variables override file values; compiled defaults fill the rest.
//! The API key is only ever read from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default session instructions template. Placeholders are filled per
/// session from the active profile and wake model.
const DEFAULT_INSTRUCTIONS: &str = "You are Hearth, a friendly voice companion for a {user_age}-year-old whose \
native language is {native_language}. Speak {learning_language} at a level a \
{comprehension_age}-year-old understands. Keep replies short, warm, and playful. \
When the user says \"{sleep_word}\", say a one-sentence goodbye.\n\
What you remember from earlier sessions:\n{memory}";

/// Default transcription hint template.
const DEFAULT_TRANSCRIPTION_PROMPT: &str = "The speaker is a {user_age}-year-old practicing {learning_language}. \
They may end the conversation with \"{sleep_word}\".";

/// Default greeting request instructions.
const DEFAULT_GREETING_INSTRUCTIONS: &str =
    "Greet the user in {learning_language} with one short sentence and invite them to talk.";

/// Default summarization prompt. The model must answer with JSON only.
const DEFAULT_SUMMARY_PROMPT: &str = "Summarize this conversation for a learning journal written in {native_language}. \
Respond with JSON only, keys: summary (string), progress (object with new_vocab, \
mistakes, strengths string arrays and next_focus string), recent_items (array of \
objects with type and text, type one of joke, vocab, story, fact, topic), \
recent_user_requests (array of strings).";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name of the profile selected for this run
    pub active_profile: String,

    /// User profiles by name
    pub profiles: BTreeMap<String, Profile>,

    /// Wake models by language code
    pub languages: BTreeMap<String, WakeModel>,

    /// Session timeouts and thresholds
    #[serde(default)]
    pub session: SessionTuning,

    /// Realtime peer endpoint and prompt templates
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Summarization endpoint and prompt
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Audio device settings
    #[serde(default)]
    pub audio: AudioSettings,

    /// Wake detection tuning
    #[serde(default)]
    pub wake: WakeConfig,

    /// Sound cue files
    #[serde(default)]
    pub sounds: SoundConfig,

    /// Data directory override (default: platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// API key for the realtime and summarization services.
    /// Never read from the file; filled from the environment in [`Config::load`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// A configured user identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// User age in years
    pub age: u32,

    /// Native language code (must be a configured language)
    pub native_language: String,

    /// Learning-language code -> comprehension age
    #[serde(default)]
    pub learning_languages: BTreeMap<String, u32>,
}

/// Per-language wake model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WakeModel {
    /// Language code; filled from the `languages` map key after load
    #[serde(default)]
    pub language: String,

    /// Display name used in prompts (e.g. "Korean")
    pub language_name: String,

    /// Spoken phrase that activates a session
    pub wake_phrase: String,

    /// Spoken phrase that ends a session
    pub sleep_phrase: String,

    /// Model artifact stem handed to the scoring capability
    pub model: String,

    /// Confidence threshold override for this model
    #[serde(default)]
    pub threshold: Option<f32>,

    /// Tie-break rank when several models cross threshold in the same
    /// frame; lower wins
    #[serde(default = "default_priority")]
    pub priority: u32,
}

/// Session timeouts and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionTuning {
    /// Idle timeout while waiting for the greeting, seconds
    pub greeting_timeout_secs: u64,

    /// Idle timeout during conversation, seconds
    pub conversation_timeout_secs: u64,

    /// Sleep-word similarity threshold, percent
    pub sleep_word_threshold: u8,

    /// RMS energy above which an input frame counts as voice activity
    /// for barge-in
    pub barge_rms_threshold: f32,

    /// Minimum language-detection confidence before a correction hint
    /// is issued
    pub language_hint_confidence: f64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            greeting_timeout_secs: 8,
            conversation_timeout_secs: 60,
            sleep_word_threshold: 80,
            barge_rms_threshold: 0.015,
            language_hint_confidence: 0.5,
        }
    }
}

/// Realtime peer endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RealtimeConfig {
    /// WebSocket URL of the realtime service
    pub url: String,

    /// Model identifier appended as a query parameter
    pub model: String,

    /// Voice identifier for assistant audio
    pub voice: String,

    /// Session audio sample rate in Hz (PCM16 mono both directions)
    pub sample_rate: u32,

    /// Connect/handshake timeout, seconds
    pub connect_timeout_secs: u64,

    /// Session instructions template
    pub instructions: String,

    /// Transcription hint template
    pub transcription_prompt: String,

    /// Instructions for the opening greeting request
    pub greeting_instructions: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            sample_rate: 24_000,
            connect_timeout_secs: 10,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            transcription_prompt: DEFAULT_TRANSCRIPTION_PROMPT.to_string(),
            greeting_instructions: DEFAULT_GREETING_INSTRUCTIONS.to_string(),
        }
    }
}

/// Summarization endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SummaryConfig {
    /// HTTP endpoint for summarization requests
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Transcript tail budget in characters
    pub max_chars: usize,

    /// Request timeout, seconds
    pub timeout_secs: u64,

    /// Summarization prompt template
    pub prompt: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/responses".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_chars: 4_000,
            timeout_secs: 30,
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

/// Audio device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AudioSettings {
    /// Channel sample rate in Hz
    pub sample_rate: u32,

    /// Frame duration in milliseconds
    pub frame_ms: u32,

    /// Linear gain applied to captured samples
    pub input_gain: f32,

    /// Bounded frame queue depth per consumer
    pub queue_frames: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_ms: 30,
            input_gain: 1.0,
            queue_frames: 32,
        }
    }
}

impl AudioSettings {
    /// Samples per frame at the configured rate
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        (self.sample_rate as usize / 1000) * self.frame_ms as usize
    }
}

/// Wake detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WakeConfig {
    /// Default confidence threshold for models without an override
    pub threshold: f32,

    /// Window after a trigger during which further triggers are ignored,
    /// milliseconds
    pub debounce_ms: u64,

    /// Scoring window length, milliseconds
    pub window_ms: u64,

    /// Consecutive listen faults before the process gives up
    pub max_faults: u32,

    /// Backoff cap between listen retries, seconds
    pub backoff_cap_secs: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            debounce_ms: 1_500,
            window_ms: 1_200,
            max_faults: 5,
            backoff_cap_secs: 30,
        }
    }
}

/// Sound cue files. A missing entry or file skips the cue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SoundConfig {
    /// Played after a wake trigger
    pub awake: Option<PathBuf>,

    /// Played when an utterance is committed
    pub sent: Option<PathBuf>,

    /// Played after a session ends
    pub bye: Option<PathBuf>,
}

const fn default_priority() -> u32 {
    100
}

/// Default config file path: `~/.config/hearth/config.yml`
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/hearth/config.yml"),
        |d| d.config_dir().join("hearth").join("config.yml"),
    )
}

/// Default data directory: `~/.local/share/hearth` on Linux
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("hearth"))
}

impl Config {
    /// Load configuration.
    ///
    /// Resolution order: explicit `path` argument, then `HEARTH_CONFIG`,
    /// then the default XDG path. A missing file yields the compiled
    /// defaults; a present but invalid file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = path.map_or_else(
            || {
                std::env::var("HEARTH_CONFIG")
                    .map_or_else(|_| default_config_path(), PathBuf::from)
            },
            Path::to_path_buf,
        );

        let mut config = if resolved.exists() {
            let content = std::fs::read_to_string(&resolved)?;
            let config = Self::from_yaml(&content)?;
            tracing::info!(path = %resolved.display(), "loaded configuration");
            config
        } else {
            tracing::info!(
                path = %resolved.display(),
                "no config file found, using built-in defaults"
            );
            Self::default()
        };

        config.api_key = std::env::var("HEARTH_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        if let Ok(dir) = std::env::var("HEARTH_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document into a config, filling each wake model's
    /// language code from its map key.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or contains unknown keys.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        for (code, model) in &mut config.languages {
            model.language.clone_from(code);
        }
        Ok(config)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            return Err(Error::Config("no languages configured".to_string()));
        }
        let profile = self.profiles.get(&self.active_profile).ok_or_else(|| {
            Error::Config(format!(
                "active_profile '{}' not found in profiles",
                self.active_profile
            ))
        })?;
        if !self.languages.contains_key(&profile.native_language) {
            return Err(Error::Config(format!(
                "profile '{}' native language '{}' has no configured wake model",
                self.active_profile, profile.native_language
            )));
        }
        for code in profile.learning_languages.keys() {
            if !self.languages.contains_key(code) {
                return Err(Error::Config(format!(
                    "profile '{}' learning language '{}' has no configured wake model",
                    self.active_profile, code
                )));
            }
        }
        if self.session.sleep_word_threshold > 100 {
            return Err(Error::Config(
                "session.sleep_word_threshold must be 0-100".to_string(),
            ));
        }
        if !(10..=100).contains(&self.audio.frame_ms) {
            return Err(Error::Config(
                "audio.frame_ms must be between 10 and 100".to_string(),
            ));
        }
        Ok(())
    }

    /// The profile selected by `active_profile`.
    ///
    /// Only valid after [`Config::validate`] has passed.
    #[must_use]
    pub fn active_profile(&self) -> &Profile {
        &self.profiles[&self.active_profile]
    }

    /// Wake models ordered by priority, then language code.
    #[must_use]
    pub fn wake_models(&self) -> Vec<&WakeModel> {
        let mut models: Vec<&WakeModel> = self.languages.values().collect();
        models.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.language.cmp(&b.language))
        });
        models
    }

    /// Map a detected model identifier back to its wake model.
    ///
    /// Unknown identifiers fall back to the highest-priority model, so a
    /// stale scorer configuration cannot strand the daemon.
    #[must_use]
    pub fn model_for_id(&self, model_id: &str) -> Option<&WakeModel> {
        self.languages
            .values()
            .find(|m| m.model == model_id)
            .or_else(|| self.wake_models().first().copied())
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Per-model threshold, falling back to the global wake threshold.
    #[must_use]
    pub fn wake_threshold(&self, model: &WakeModel) -> f32 {
        model.threshold.unwrap_or(self.wake.threshold)
    }
}

impl Default for Config {
    /// Built-in single-profile English setup used when no file exists.
    fn default() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "en".to_string(),
            WakeModel {
                language: "en".to_string(),
                language_name: "English".to_string(),
                wake_phrase: "hey hearth".to_string(),
                sleep_phrase: "goodnight hearth".to_string(),
                model: "hey_hearth".to_string(),
                threshold: None,
                priority: 0,
            },
        );
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                age: 8,
                native_language: "en".to_string(),
                learning_languages: BTreeMap::new(),
            },
        );
        Self {
            active_profile: "default".to_string(),
            profiles,
            languages,
            session: SessionTuning::default(),
            realtime: RealtimeConfig::default(),
            summary: SummaryConfig::default(),
            audio: AudioSettings::default(),
            wake: WakeConfig::default(),
            sounds: SoundConfig::default(),
            data_dir: None,
            api_key: None,
        }
    }
}
