//! Daemon - the always-on companion loop
//!
//! Orchestrates the cycle the device lives in: listen for a wake word,
//! run a realtime conversation session, fold the transcript into the
//! profile's memory, go back to listening. Wake-loop faults back off
//! exponentially; too many in a row stop the daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioChannel, AudioEngine, Consumer, Cue, InputHandle, SoundBank};
use crate::config::Config;
use crate::lang::{LanguageDetector, WhatlangDetector};
use crate::memory::{HttpSummarizer, MemoryStore};
use crate::observer::{self, ObserverEvent};
use crate::session::{
    ConversationSession, EndReason, SessionContext, SessionOutcome, Transcript, WsTransport,
};
use crate::wake::{EnergyScorer, ModelSpec, WakeEvent, WakeWordDetector};
use crate::{Error, Result};

/// First retry delay after a wake-loop fault
const BACKOFF_FLOOR_SECS: u64 = 1;

/// Seconds granted beyond the summary timeout before a merge is abandoned
const SUMMARY_GRACE_SECS: u64 = 15;

/// The Hearth daemon - wake word, sessions, and memory in one loop
pub struct Daemon {
    config: Config,
    api_key: String,
    channel: AudioChannel,
    sounds: Arc<SoundBank>,
    store: MemoryStore,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("profile", &self.config.active_profile)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no API key is
    /// present, or the summarizer client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config("HEARTH_API_KEY or OPENAI_API_KEY required".to_string())
        })?;

        let channel = AudioChannel::new(&config.audio);
        let sounds = Arc::new(SoundBank::load(&config.sounds, &config.audio));
        let summarizer = Arc::new(HttpSummarizer::new(config.summary.clone(), api_key.clone())?);
        let store = MemoryStore::new(config.data_dir(), config.summary.clone(), summarizer);

        tracing::info!(data_dir = %config.data_dir().display(), "daemon initialized");

        Ok(Self {
            config,
            api_key,
            channel,
            sounds,
            store,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the daemon when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the daemon until interrupted
    ///
    /// cpal streams are not Send, so the engine lives on the calling
    /// task for the daemon's whole life.
    ///
    /// # Errors
    ///
    /// Returns an error when the audio device keeps faulting past
    /// `wake.max_faults` consecutive failures.
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        observer::init_observer();

        tracing::info!(
            profile = %self.config.active_profile,
            languages = self.config.languages.len(),
            "daemon running"
        );

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });

        let mut detector = self.build_detector();
        tracing::info!(models = detector.model_count(), "wake detection armed");
        let mut engine: Option<AudioEngine> = None;
        let mut faults: u32 = 0;
        let mut backoff = Duration::from_secs(BACKOFF_FLOOR_SECS);
        let backoff_cap = Duration::from_secs(self.config.wake.backoff_cap_secs);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if engine.is_none() {
                match AudioEngine::start(&self.channel, &self.config.audio) {
                    Ok(started) => engine = Some(started),
                    Err(e) => {
                        faults += 1;
                        if faults >= self.config.wake.max_faults {
                            tracing::error!(error = %e, faults, "audio engine unrecoverable");
                            return Err(e);
                        }
                        tracing::warn!(
                            error = %e,
                            faults,
                            retry_in_secs = backoff.as_secs(),
                            "audio engine start failed, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(backoff_cap);
                        continue;
                    }
                }
            }

            let mut input = match self.channel.acquire_input(Consumer::WakeDetector) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(error = %e, "wake input unavailable");
                    return Err(e);
                }
            };

            let listened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                listened = detector.listen(&mut input) => listened,
            };

            match listened {
                Ok(event) => {
                    faults = 0;
                    backoff = Duration::from_secs(BACKOFF_FLOOR_SECS);

                    // Atomic role handoff; the wake handle is revoked, not released,
                    // so no other consumer can slip in between.
                    let session_input = match self
                        .channel
                        .handoff_input(Consumer::WakeDetector, Consumer::Session)
                    {
                        Ok(handle) => handle,
                        Err(e) => {
                            tracing::error!(error = %e, "input handoff failed");
                            continue;
                        }
                    };
                    drop(input);

                    self.run_session(&event, session_input).await;
                }
                Err(e) => {
                    drop(input);
                    faults += 1;
                    if faults >= self.config.wake.max_faults {
                        tracing::error!(error = %e, faults, "wake loop fault limit reached");
                        return Err(e);
                    }
                    tracing::warn!(
                        error = %e,
                        faults,
                        retry_in_secs = backoff.as_secs(),
                        "wake loop fault, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(backoff_cap);
                    // Streams may be dead after a device error; rebuild them.
                    self.channel.clear_fault();
                    engine = None;
                }
            }
        }

        drop(engine);
        tracing::info!("daemon stopped");
        Ok(())
    }

    /// One full wake-to-memory cycle.
    ///
    /// Session and merge failures are logged, never propagated; the
    /// wake loop must come back no matter how the session went.
    async fn run_session(&self, event: &WakeEvent, input: InputHandle) {
        observer::publish(ObserverEvent::WakeTriggered {
            model: event.model.clone(),
            score: event.score,
        });

        let Some(model) = self.config.model_for_id(&event.model) else {
            tracing::error!(model = %event.model, "no wake model configured");
            return;
        };
        let model = model.clone();
        let language = model.language.clone();
        tracing::info!(
            model = %model.model,
            language = %language,
            score = event.score,
            "wake word detected"
        );

        if let Err(e) = self.sounds.play(&self.channel, Cue::Awake).await {
            tracing::debug!(error = %e, "awake cue skipped");
        }

        let profile_name = self.config.active_profile.clone();
        let profile = self.config.active_profile().clone();
        let native_name = self
            .config
            .languages
            .get(&profile.native_language)
            .map_or_else(|| profile.native_language.clone(), |m| m.language_name.clone());
        let memory_block = self.store.load(&profile_name).format_for_prompt();

        let codes: Vec<String> = self.config.languages.keys().cloned().collect();
        let lang: Arc<dyn LanguageDetector> = Arc::new(WhatlangDetector::new(
            &codes,
            self.config.session.language_hint_confidence,
        ));

        let started_at = Utc::now();
        let outcome = match WsTransport::connect(&self.config.realtime, &self.api_key).await {
            Ok(transport) => {
                let ctx = SessionContext {
                    profile_name: profile_name.clone(),
                    profile,
                    model,
                    native_language_name: native_name.clone(),
                    tuning: self.config.session.clone(),
                    realtime: self.config.realtime.clone(),
                    memory_block,
                    channel: self.channel.clone(),
                    sounds: Arc::clone(&self.sounds),
                    lang,
                    cancel: self.cancel.clone(),
                };
                ConversationSession::new(ctx).run(transport, input).await
            }
            Err(e) => {
                tracing::error!(error = %e, "session connect failed");
                drop(input);
                SessionOutcome {
                    session_id: Uuid::new_v4(),
                    language,
                    transcript: Transcript::new(),
                    end_reason: EndReason::Fault(e.kind().to_string()),
                    started_at,
                    ended_at: Utc::now(),
                }
            }
        };

        tracing::info!(
            session_id = %outcome.session_id,
            end_reason = %outcome.end_reason,
            fragments = outcome.transcript.len(),
            "session finished"
        );

        if let Err(e) = self.sounds.play(&self.channel, Cue::Bye).await {
            tracing::debug!(error = %e, "bye cue skipped");
        }

        // Bounded so a hung summary endpoint cannot strand the wake loop.
        let grace = Duration::from_secs(self.config.summary.timeout_secs + SUMMARY_GRACE_SECS);
        match tokio::time::timeout(
            grace,
            self.store
                .summarize_and_merge(&profile_name, &native_name, &outcome),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "memory merge failed"),
            Err(_) => tracing::error!(grace_secs = grace.as_secs(), "memory merge timed out"),
        }
    }

    fn build_detector(&self) -> WakeWordDetector {
        let models: Vec<ModelSpec> = self
            .config
            .wake_models()
            .iter()
            .map(|m| ModelSpec {
                id: m.model.clone(),
                threshold: self.config.wake_threshold(m),
                priority: m.priority,
            })
            .collect();
        let scorer = EnergyScorer::new(
            models.iter().map(|m| m.id.clone()).collect(),
            &self.config.wake,
        );
        WakeWordDetector::new(models, &self.config.wake, Box::new(scorer))
    }
}
