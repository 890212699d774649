//! Conversation session state machine
//!
//! One session runs from wake trigger to transcript handoff:
//! `Connecting → Greeting → Listening ⇄ AssistantSpeaking → Summarizing`,
//! with `Errored` reachable from any non-terminal phase. A capture pump
//! and the peer stream feed one ordered select loop; that loop is the
//! only place transitions happen, so events are processed one at a time
//! in arrival order.

mod protocol;
mod transcript;
mod transport;

pub use protocol::{ClientEvent, ErrorDetail, PromptContext, ServerEvent, decode_audio, encode_audio};
pub use transcript::{Speaker, Transcript, TranscriptFragment};
pub use transport::{RealtimeTransport, WsTransport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioChannel, AudioFrame, Consumer, Cue, InputHandle, OutputHandle, SoundBank};
use crate::config::{Profile, RealtimeConfig, SessionTuning, WakeModel};
use crate::lang::LanguageDetector;
use crate::observer::{self, ObserverEvent};
use crate::sleep::SleepWordMatcher;
use crate::{Error, Result};

/// Malformed inbound messages tolerated before the session errors out
const MAX_PROTOCOL_STRIKES: u32 = 3;

/// Phases of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshaking with the realtime peer
    Connecting,
    /// Waiting for the opening greeting to finish playing
    Greeting,
    /// Waiting for user speech
    Listening,
    /// Assistant audio is playing
    AssistantSpeaking,
    /// Transcript is being handed to the memory store
    Summarizing,
    /// An unrecoverable fault ended the session
    Errored,
    /// All resources released
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Greeting => write!(f, "greeting"),
            Self::Listening => write!(f, "listening"),
            Self::AssistantSpeaking => write!(f, "assistant_speaking"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Errored => write!(f, "errored"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The user said the sleep phrase
    SleepWord,
    /// Conversation idle timeout expired
    Timeout,
    /// No greeting activity within the greeting timeout
    GreetingTimeout,
    /// External stop signal (shutdown)
    Stop,
    /// The peer closed the connection cleanly
    PeerClosed,
    /// A session-fatal fault, by kind
    Fault(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SleepWord => write!(f, "sleep_word"),
            Self::Timeout => write!(f, "timeout"),
            Self::GreetingTimeout => write!(f, "greeting_timeout"),
            Self::Stop => write!(f, "stop"),
            Self::PeerClosed => write!(f, "peer_closed"),
            Self::Fault(kind) => write!(f, "fault:{kind}"),
        }
    }
}

/// Everything a finished session hands to the memory store.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Session identifier
    pub session_id: Uuid,
    /// Language code the session ran in
    pub language: String,
    /// Finalized fragments in turn order
    pub transcript: Transcript,
    /// Why the session ended
    pub end_reason: EndReason,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// When the session ended
    pub ended_at: DateTime<Utc>,
}

/// Static inputs for one session run.
pub struct SessionContext {
    /// Name of the active profile
    pub profile_name: String,
    /// The active profile
    pub profile: Profile,
    /// Wake model the trigger selected
    pub model: WakeModel,
    /// Display name of the profile's native language
    pub native_language_name: String,
    /// Timeouts and thresholds
    pub tuning: SessionTuning,
    /// Peer endpoint settings and prompt templates
    pub realtime: RealtimeConfig,
    /// Formatted memory block for the instruction template
    pub memory_block: String,
    /// The shared audio channel
    pub channel: AudioChannel,
    /// Cue clips
    pub sounds: Arc<SoundBank>,
    /// Language identification capability
    pub lang: Arc<dyn LanguageDetector>,
    /// External stop signal
    pub cancel: CancellationToken,
}

/// Events the capture pump forwards to the state loop.
enum PumpEvent {
    /// A captured microphone frame
    Mic(AudioFrame),
    /// Voice activity while the assistant was speaking
    Barge,
    /// The capture stream failed
    Fault(Error),
}

/// What one iteration of the select loop observed.
enum Step {
    Cancelled,
    Pump(Option<PumpEvent>),
    Peer(Result<Option<ServerEvent>>),
    IdleTimeout,
    Drained(Result<()>),
}

/// Mutable loop state.
struct Flow {
    phase: SessionPhase,
    deadline: Instant,
    transcript: Transcript,
    end: Option<EndReason>,
    /// Peer finished producing audio; waiting for playback to finish
    draining: bool,
    /// A language hint may be sent before the next response
    hint_armed: bool,
    /// Turn currently streaming assistant audio
    current_turn: u64,
    /// Turn cancelled by barge-in; its late deltas are dropped
    cancelled_turn: Option<u64>,
    protocol_strikes: u32,
}

/// A single wake-to-sleep conversation.
pub struct ConversationSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    ctx: SessionContext,
}

impl ConversationSession {
    /// Create a session for one wake trigger.
    #[must_use]
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ctx,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session to completion over an established transport.
    ///
    /// Always returns an outcome: faults become `EndReason::Fault` with
    /// whatever transcript was captured before the failure, never a
    /// bare error.
    #[allow(clippy::too_many_lines)]
    pub async fn run<T: RealtimeTransport>(
        self,
        mut transport: T,
        input: InputHandle,
    ) -> SessionOutcome {
        let session_id = self.id;
        tracing::info!(
            session_id = %session_id,
            language = %self.ctx.model.language,
            profile = %self.ctx.profile_name,
            "session starting"
        );
        self.phase_event(SessionPhase::Connecting);

        let prompt = self.prompt_context();
        if let Err(e) = transport
            .send(protocol::session_update(&self.ctx.realtime, &prompt))
            .await
        {
            return self.abort(transport, &e).await;
        }
        if let Err(e) = transport
            .send(protocol::greeting_request(&self.ctx.realtime, &prompt))
            .await
        {
            return self.abort(transport, &e).await;
        }

        let output = match self.ctx.channel.acquire_output(Consumer::Session) {
            Ok(handle) => handle,
            Err(e) => return self.abort(transport, &e).await,
        };

        let speaking = Arc::new(AtomicBool::new(false));
        let queue_depth = self.ctx.channel.settings().queue_frames.max(1);
        let (tx, mut rx) = mpsc::channel(queue_depth);
        let pump_cancel = CancellationToken::new();
        let pump = spawn_capture_pump(
            input,
            self.ctx.channel.clone(),
            Arc::clone(&speaking),
            self.ctx.tuning.barge_rms_threshold,
            tx,
            pump_cancel.clone(),
        );

        let matcher = SleepWordMatcher::new(
            &self.ctx.model.sleep_phrase,
            self.ctx.tuning.sleep_word_threshold,
        );
        let mut flow = Flow {
            phase: SessionPhase::Connecting,
            deadline: Instant::now() + self.greeting_timeout(),
            transcript: Transcript::new(),
            end: None,
            draining: false,
            hint_armed: true,
            current_turn: 0,
            cancelled_turn: None,
            protocol_strikes: 0,
        };
        self.set_phase(&mut flow, SessionPhase::Greeting);

        while flow.end.is_none() {
            let step = tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => Step::Cancelled,
                event = rx.recv() => Step::Pump(event),
                event = transport.next_event() => Step::Peer(event),
                result = output.drained(), if flow.draining => Step::Drained(result),
                () = sleep_until(flow.deadline) => Step::IdleTimeout,
            };

            match step {
                Step::Cancelled => {
                    tracing::info!(session_id = %session_id, "stop signal received");
                    flow.end = Some(EndReason::Stop);
                }
                Step::Pump(Some(PumpEvent::Barge)) => {
                    if speaking.load(Ordering::SeqCst) {
                        self.interrupt(&mut flow, &mut transport, &output, &speaking, "local")
                            .await;
                    }
                }
                Step::Pump(Some(PumpEvent::Mic(frame))) => {
                    let event = ClientEvent::InputAudioAppend {
                        audio: protocol::encode_audio(&frame.samples),
                    };
                    if let Err(e) = transport.send(event).await {
                        tracing::warn!(session_id = %session_id, error = %e, "mic upload failed");
                        flow.end = Some(EndReason::Fault(e.kind().to_string()));
                    }
                }
                Step::Pump(Some(PumpEvent::Fault(e))) => {
                    tracing::warn!(session_id = %session_id, error = %e, "capture fault");
                    flow.end = Some(EndReason::Fault(e.kind().to_string()));
                }
                Step::Pump(None) => {
                    flow.end = Some(EndReason::Fault("channel".to_string()));
                }
                Step::Peer(Ok(Some(event))) => {
                    self.on_peer_event(&mut flow, event, &mut transport, &output, &speaking, &matcher)
                        .await;
                }
                Step::Peer(Ok(None)) => {
                    tracing::info!(session_id = %session_id, "peer closed the connection");
                    flow.end = Some(EndReason::PeerClosed);
                }
                Step::Peer(Err(Error::Protocol(message))) => {
                    flow.protocol_strikes += 1;
                    tracing::warn!(
                        session_id = %session_id,
                        strikes = flow.protocol_strikes,
                        error = %message,
                        "discarding malformed peer message"
                    );
                    if flow.protocol_strikes >= MAX_PROTOCOL_STRIKES {
                        flow.end = Some(EndReason::Fault("protocol".to_string()));
                    }
                }
                Step::Peer(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "peer stream failed");
                    flow.end = Some(EndReason::Fault(e.kind().to_string()));
                }
                Step::Drained(Ok(())) => {
                    flow.draining = false;
                    speaking.store(false, Ordering::SeqCst);
                    if flow.phase == SessionPhase::Greeting {
                        tracing::info!(session_id = %session_id, "greeting played, listening");
                    }
                    self.set_phase(&mut flow, SessionPhase::Listening);
                    self.reset_idle(&mut flow);
                }
                Step::Drained(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "playback drain failed");
                    flow.end = Some(EndReason::Fault(e.kind().to_string()));
                }
                Step::IdleTimeout => {
                    let reason = if flow.phase == SessionPhase::Greeting {
                        EndReason::GreetingTimeout
                    } else {
                        EndReason::Timeout
                    };
                    tracing::info!(session_id = %session_id, phase = %flow.phase, "idle timeout");
                    flow.end = Some(reason);
                }
            }
        }

        // Teardown: silence playback, stop the pump, drop the link
        speaking.store(false, Ordering::SeqCst);
        if let Err(e) = output.clear() {
            tracing::debug!(session_id = %session_id, error = %e, "output already revoked");
        }
        pump_cancel.cancel();
        drop(rx);
        let _ = pump.await;
        drop(output);
        if let Err(e) = transport.close().await {
            tracing::debug!(session_id = %session_id, error = %e, "close failed");
        }

        let end_reason = flow.end.unwrap_or(EndReason::Stop);
        if matches!(end_reason, EndReason::Fault(_)) {
            self.phase_event(SessionPhase::Errored);
        }
        self.finish(flow.transcript, end_reason)
    }

    /// Handle one inbound peer event.
    #[allow(clippy::too_many_lines)]
    async fn on_peer_event<T: RealtimeTransport>(
        &self,
        flow: &mut Flow,
        event: ServerEvent,
        transport: &mut T,
        output: &OutputHandle,
        speaking: &AtomicBool,
        matcher: &SleepWordMatcher,
    ) {
        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                tracing::debug!(session_id = %self.id, "peer acknowledged session");
            }
            ServerEvent::SpeechStarted => {
                tracing::debug!(session_id = %self.id, "user speech started");
                if speaking.load(Ordering::SeqCst) {
                    self.interrupt(flow, transport, output, speaking, "peer_vad").await;
                }
            }
            ServerEvent::SpeechStopped => {
                tracing::debug!(session_id = %self.id, "user speech stopped");
                if flow.phase == SessionPhase::Listening && !speaking.load(Ordering::SeqCst) {
                    for frame in self.ctx.sounds.frames(Cue::Sent) {
                        if let Err(e) = output.write(frame) {
                            tracing::debug!(session_id = %self.id, error = %e, "sent cue skipped");
                            break;
                        }
                    }
                }
            }
            ServerEvent::TranscriptionCompleted { turn, transcript } => {
                self.push_fragment(flow, turn, Speaker::User, &transcript);
                if matcher.matches(&transcript) {
                    flow.end = Some(EndReason::SleepWord);
                } else {
                    self.maybe_hint(flow, &transcript, transport).await;
                }
            }
            ServerEvent::AudioDelta { turn, delta } => {
                if flow.cancelled_turn == Some(turn) {
                    return;
                }
                flow.current_turn = turn;
                match protocol::decode_audio(&delta) {
                    Ok(samples) => {
                        if !speaking.swap(true, Ordering::SeqCst) {
                            self.reset_idle(flow);
                            if flow.phase == SessionPhase::Listening {
                                self.set_phase(flow, SessionPhase::AssistantSpeaking);
                            }
                        }
                        flow.draining = false;
                        self.play_samples(flow, &samples, output);
                    }
                    Err(e) => {
                        // A response we cannot play is structural
                        tracing::warn!(session_id = %self.id, error = %e, "bad audio payload");
                        flow.end = Some(EndReason::Fault("protocol".to_string()));
                    }
                }
            }
            ServerEvent::AudioTranscriptDone { turn, transcript } => {
                self.push_fragment(flow, turn, Speaker::Assistant, &transcript);
            }
            ServerEvent::ResponseDone { turn } => {
                tracing::debug!(session_id = %self.id, turn, "response complete");
                flow.hint_armed = true;
                if flow.cancelled_turn == Some(turn) {
                    flow.cancelled_turn = None;
                } else if speaking.load(Ordering::SeqCst) {
                    flow.draining = true;
                } else if flow.phase == SessionPhase::Greeting {
                    // Audio-less greeting; move on rather than time out
                    self.set_phase(flow, SessionPhase::Listening);
                    self.reset_idle(flow);
                }
            }
            ServerEvent::Error { error } => {
                tracing::warn!(
                    session_id = %self.id,
                    code = error.code.as_deref().unwrap_or("unknown"),
                    message = %error.message,
                    "peer reported an error"
                );
                flow.end = Some(EndReason::Fault("protocol".to_string()));
            }
            ServerEvent::Unknown => {
                tracing::debug!(session_id = %self.id, "ignoring unknown event type");
            }
        }
    }

    /// Record a finalized fragment and reset the idle clock.
    fn push_fragment(&self, flow: &mut Flow, turn: u64, speaker: Speaker, text: &str) {
        tracing::info!(
            session_id = %self.id,
            turn,
            speaker = %speaker,
            text = %text,
            "transcript fragment"
        );
        flow.transcript.push(turn, speaker, text);
        observer::publish(ObserverEvent::Fragment {
            session_id: self.id,
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
        self.reset_idle(flow);
    }

    /// Stop assistant playback and notify the peer.
    async fn interrupt<T: RealtimeTransport>(
        &self,
        flow: &mut Flow,
        transport: &mut T,
        output: &OutputHandle,
        speaking: &AtomicBool,
        source: &str,
    ) {
        speaking.store(false, Ordering::SeqCst);
        flow.draining = false;
        flow.cancelled_turn = Some(flow.current_turn);
        if let Err(e) = output.clear() {
            tracing::debug!(session_id = %self.id, error = %e, "clear on interrupt failed");
        }
        tracing::info!(session_id = %self.id, source, "assistant interrupted");
        for event in [ClientEvent::ResponseCancel, ClientEvent::OutputAudioClear] {
            if let Err(e) = transport.send(event).await {
                tracing::warn!(session_id = %self.id, error = %e, "interrupt notice failed");
                flow.end = Some(EndReason::Fault(e.kind().to_string()));
                return;
            }
        }
        self.set_phase(flow, SessionPhase::Listening);
    }

    /// Inject a translate-and-correct note when the user answered in
    /// their native language during a learning-language session.
    async fn maybe_hint<T: RealtimeTransport>(
        &self,
        flow: &mut Flow,
        text: &str,
        transport: &mut T,
    ) {
        if !flow.hint_armed {
            return;
        }
        if self.ctx.model.language == self.ctx.profile.native_language {
            return;
        }
        let detection = self.ctx.lang.detect(text);
        if !detection.is_determined()
            || detection.language != self.ctx.profile.native_language
            || detection.confidence < self.ctx.tuning.language_hint_confidence
        {
            return;
        }
        tracing::debug!(
            session_id = %self.id,
            detected = %detection.language,
            confidence = detection.confidence,
            "user answered in native language, sending hint"
        );
        let note = format!(
            "The child just answered in {}. Briefly translate their reply into {} and \
             encourage them to say it in {}.",
            self.ctx.native_language_name, self.ctx.model.language_name, self.ctx.model.language_name
        );
        flow.hint_armed = false;
        if let Err(e) = transport.send(protocol::system_note(&note)).await {
            tracing::warn!(session_id = %self.id, error = %e, "hint send failed");
            flow.end = Some(EndReason::Fault(e.kind().to_string()));
        }
    }

    /// Queue decoded assistant samples for playback.
    fn play_samples(&self, flow: &mut Flow, samples: &[i16], output: &OutputHandle) {
        let frame_samples = self.ctx.channel.settings().frame_samples().max(1);
        let rate = self.ctx.realtime.sample_rate;
        for chunk in samples.chunks(frame_samples) {
            if let Err(e) = output.write(AudioFrame::new(chunk.to_vec(), rate)) {
                tracing::warn!(session_id = %self.id, error = %e, "playback write failed");
                flow.end = Some(EndReason::Fault(e.kind().to_string()));
                return;
            }
        }
    }

    /// Template values for this session's prompts.
    fn prompt_context(&self) -> PromptContext {
        let native_session = self.ctx.model.language == self.ctx.profile.native_language;
        let comprehension_age = if native_session {
            self.ctx.profile.age
        } else {
            self.ctx
                .profile
                .learning_languages
                .get(&self.ctx.model.language)
                .copied()
                .unwrap_or(self.ctx.profile.age)
        };
        PromptContext {
            user_age: self.ctx.profile.age,
            native_language: self.ctx.native_language_name.clone(),
            learning_language: self.ctx.model.language_name.clone(),
            comprehension_age,
            sleep_word: self.ctx.model.sleep_phrase.clone(),
            memory: self.ctx.memory_block.clone(),
        }
    }

    fn greeting_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.tuning.greeting_timeout_secs)
    }

    fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.tuning.conversation_timeout_secs)
    }

    /// Push the idle deadline out by the current phase's timeout.
    fn reset_idle(&self, flow: &mut Flow) {
        let timeout = if flow.phase == SessionPhase::Greeting {
            self.greeting_timeout()
        } else {
            self.conversation_timeout()
        };
        flow.deadline = Instant::now() + timeout;
    }

    fn set_phase(&self, flow: &mut Flow, next: SessionPhase) {
        if flow.phase == next {
            return;
        }
        tracing::debug!(session_id = %self.id, from = %flow.phase, to = %next, "phase change");
        flow.phase = next;
        self.phase_event(next);
    }

    fn phase_event(&self, phase: SessionPhase) {
        observer::publish(ObserverEvent::Phase {
            session_id: self.id,
            phase: phase.to_string(),
        });
    }

    /// Abandon a session that failed during setup.
    async fn abort<T: RealtimeTransport>(self, mut transport: T, error: &Error) -> SessionOutcome {
        tracing::warn!(session_id = %self.id, error = %error, "session aborted during setup");
        self.phase_event(SessionPhase::Errored);
        let _ = transport.close().await;
        self.finish(
            Transcript::new(),
            EndReason::Fault(error.kind().to_string()),
        )
    }

    /// Seal the outcome and announce the summarizing handoff.
    fn finish(self, transcript: Transcript, end_reason: EndReason) -> SessionOutcome {
        self.phase_event(SessionPhase::Summarizing);
        observer::publish(ObserverEvent::SessionEnded {
            session_id: self.id,
            reason: end_reason.to_string(),
            fragments: transcript.len(),
        });
        tracing::info!(
            session_id = %self.id,
            reason = %end_reason,
            fragments = transcript.len(),
            "session ended"
        );
        SessionOutcome {
            session_id: self.id,
            language: self.ctx.model.language.clone(),
            transcript,
            end_reason,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}

/// Forward captured frames to the state loop, flagging barge-in.
///
/// The output sink is cleared here, in the capture task, the moment
/// voice activity lands while the assistant is speaking; the state loop
/// then tells the peer. That keeps preemption within one frame even
/// when the loop is busy.
fn spawn_capture_pump(
    mut input: InputHandle,
    channel: AudioChannel,
    speaking: Arc<AtomicBool>,
    barge_rms: f32,
    tx: mpsc::Sender<PumpEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                frame = input.next_frame() => Some(frame),
            };
            let Some(result) = next else { break };
            match result {
                Ok(frame) => {
                    if speaking.load(Ordering::SeqCst) && frame.rms() > barge_rms {
                        if channel.clear_output(Consumer::Session).is_err() {
                            // Output role already gone; session is tearing down
                            break;
                        }
                        if tx.send(PumpEvent::Barge).await.is_err() {
                            break;
                        }
                    }
                    if tx.send(PumpEvent::Mic(frame)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(PumpEvent::Fault(e)).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn profile() -> Profile {
        Profile {
            age: 6,
            native_language: "ko".to_string(),
            learning_languages: BTreeMap::from([("en".to_string(), 4)]),
        }
    }

    fn model(language: &str) -> WakeModel {
        WakeModel {
            language: language.to_string(),
            language_name: if language == "ko" { "Korean" } else { "English" }.to_string(),
            wake_phrase: "hey hearth".to_string(),
            sleep_phrase: "goodnight hearth".to_string(),
            model: format!("{language}_model"),
            threshold: None,
            priority: 100,
        }
    }

    fn context(language: &str) -> SessionContext {
        SessionContext {
            profile_name: "mina".to_string(),
            profile: profile(),
            model: model(language),
            native_language_name: "Korean".to_string(),
            tuning: SessionTuning::default(),
            realtime: RealtimeConfig::default(),
            memory_block: "None".to_string(),
            channel: AudioChannel::new(&crate::config::AudioSettings::default()),
            sounds: Arc::new(SoundBank::empty(&crate::config::AudioSettings::default())),
            lang: Arc::new(crate::lang::WhatlangDetector::new(
                &["ko".to_string(), "en".to_string()],
                0.5,
            )),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn learning_session_uses_comprehension_age() {
        let session = ConversationSession::new(context("en"));
        let prompt = session.prompt_context();
        assert_eq!(prompt.user_age, 6);
        assert_eq!(prompt.comprehension_age, 4);
        assert_eq!(prompt.learning_language, "English");
        assert_eq!(prompt.native_language, "Korean");
    }

    #[test]
    fn native_session_uses_real_age() {
        let session = ConversationSession::new(context("ko"));
        let prompt = session.prompt_context();
        assert_eq!(prompt.comprehension_age, 6);
        assert_eq!(prompt.learning_language, "Korean");
    }

    #[test]
    fn phase_names_are_stable() {
        assert_eq!(SessionPhase::AssistantSpeaking.to_string(), "assistant_speaking");
        assert_eq!(SessionPhase::Summarizing.to_string(), "summarizing");
    }

    #[test]
    fn end_reasons_are_stable() {
        assert_eq!(EndReason::SleepWord.to_string(), "sleep_word");
        assert_eq!(EndReason::GreetingTimeout.to_string(), "greeting_timeout");
        assert_eq!(
            EndReason::Fault("connection".to_string()).to_string(),
            "fault:connection"
        );
    }
}
