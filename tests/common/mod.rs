//! Shared test utilities

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hearth_companion::Result;
use hearth_companion::audio::{AudioChannel, AudioFrame, SoundBank};
use hearth_companion::config::{AudioSettings, Profile, RealtimeConfig, SessionTuning, WakeModel};
use hearth_companion::lang::WhatlangDetector;
use hearth_companion::session::{ClientEvent, RealtimeTransport, ServerEvent, SessionContext};

/// One step of a scripted peer exchange.
pub enum Script {
    /// Deliver this event
    Recv(ServerEvent),
    /// Wait before the next step
    Pause(Duration),
    /// Close the connection cleanly
    Close,
    /// Fail the poll with this error
    Fail(hearth_companion::Error),
}

/// In-memory transport that replays a fixed script and records
/// everything the session sends.
///
/// Once the script is exhausted, `next_event` blocks forever so the
/// session ends through timeouts, barge-in, or cancellation instead.
pub struct ScriptedTransport {
    script: VecDeque<Script>,
    /// Events the session sent, in order
    pub sent: Arc<Mutex<Vec<ClientEvent>>>,
    /// Set once the session closed the transport
    pub closed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: script.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            // Pauses are peeked, not popped, so a poll dropped by the
            // session's select loop restarts the full delay next time
            if let Some(Script::Pause(delay)) = self.script.front() {
                let delay = *delay;
                tokio::time::sleep(delay).await;
                self.script.pop_front();
                continue;
            }
            match self.script.pop_front() {
                Some(Script::Recv(event)) => return Ok(Some(event)),
                Some(Script::Close) => return Ok(None),
                Some(Script::Fail(error)) => return Err(error),
                Some(Script::Pause(_)) => {}
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Context for a native-language session over `channel`.
///
/// Native sessions skip the language-correction hint, so `sent` holds
/// only the events the scenario itself produced.
#[must_use]
pub fn session_context(channel: &AudioChannel) -> SessionContext {
    let settings = AudioSettings::default();
    SessionContext {
        profile_name: "mina".to_string(),
        profile: Profile {
            age: 6,
            native_language: "ko".to_string(),
            learning_languages: BTreeMap::from([("en".to_string(), 4)]),
        },
        model: WakeModel {
            language: "ko".to_string(),
            language_name: "Korean".to_string(),
            wake_phrase: "chocopi".to_string(),
            sleep_phrase: "chocopi annyeong".to_string(),
            model: "ko_model".to_string(),
            threshold: None,
            priority: 100,
        },
        native_language_name: "Korean".to_string(),
        tuning: SessionTuning::default(),
        realtime: RealtimeConfig::default(),
        memory_block: "None".to_string(),
        channel: channel.clone(),
        sounds: Arc::new(SoundBank::empty(&settings)),
        lang: Arc::new(WhatlangDetector::new(
            &["ko".to_string(), "en".to_string()],
            0.5,
        )),
        cancel: CancellationToken::new(),
    }
}

/// A captured frame loud enough to count as voice activity.
#[must_use]
pub fn loud_frame() -> AudioFrame {
    let settings = AudioSettings::default();
    AudioFrame::new(vec![16_000; settings.frame_samples()], settings.sample_rate)
}

/// A captured frame below the barge-in energy threshold.
#[must_use]
pub fn quiet_frame() -> AudioFrame {
    let settings = AudioSettings::default();
    AudioFrame::new(vec![100; settings.frame_samples()], settings.sample_rate)
}
