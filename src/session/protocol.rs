//! Realtime wire protocol
//!
//! JSON event types exchanged with the realtime peer, tagged by `"type"`.
//! Inbound events the session does not understand deserialize to
//! [`ServerEvent::Unknown`] and are discarded without ending the session.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::audio::{bytes_to_pcm16, pcm16_to_bytes};
use crate::config::RealtimeConfig;

/// Server VAD speech threshold
const VAD_THRESHOLD: f32 = 0.5;

/// Audio retained before detected speech, milliseconds
const VAD_PREFIX_PADDING_MS: u64 = 300;

/// Trailing silence that ends an utterance, milliseconds
const VAD_SILENCE_MS: u64 = 500;

/// Transcription model requested from the peer
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Events sent to the peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session configuration, sent immediately after connect
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session parameters
        session: SessionConfig,
    },

    /// Request a spoken response (greeting elicitation)
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Per-response overrides
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseRequest>,
    },

    /// Microphone audio chunk
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64 PCM16 payload
        audio: String,
    },

    /// Abort the in-flight response (barge-in, first half)
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Drop peer-side buffered output (barge-in, second half)
    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioClear,

    /// Inject a conversation item (language-correction hint)
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item to insert
        item: ConversationItem,
    },
}

/// `session.update` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    /// Modalities the peer should produce
    pub modalities: Vec<String>,
    /// Rendered instruction prompt
    pub instructions: String,
    /// Assistant voice identifier
    pub voice: String,
    /// Inbound audio encoding
    pub input_audio_format: String,
    /// Outbound audio encoding
    pub output_audio_format: String,
    /// User-speech transcription settings
    pub input_audio_transcription: TranscriptionConfig,
    /// Peer-side voice activity detection
    pub turn_detection: TurnDetection,
}

/// Transcription settings inside [`SessionConfig`].
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionConfig {
    /// Transcription model
    pub model: String,
    /// Rendered transcription hint
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

/// Peer-side VAD settings.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    /// Detection flavor
    #[serde(rename = "type")]
    pub kind: String,
    /// Speech probability threshold
    pub threshold: f32,
    /// Audio retained before detected speech, milliseconds
    pub prefix_padding_ms: u64,
    /// Trailing silence that ends an utterance, milliseconds
    pub silence_duration_ms: u64,
}

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    /// Instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Conversation item for `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    /// Item kind, always `"message"` here
    #[serde(rename = "type")]
    pub kind: String,
    /// Message role
    pub role: String,
    /// Message content parts
    pub content: Vec<ItemContent>,
}

/// One content part of a conversation item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemContent {
    /// Content kind, always `"input_text"` here
    #[serde(rename = "type")]
    pub kind: String,
    /// The text itself
    pub text: String,
}

/// Events received from the peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake acknowledgement
    #[serde(rename = "session.created")]
    SessionCreated,

    /// Configuration acknowledgement
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Peer VAD: user started speaking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Peer VAD: user stopped speaking
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Finalized user transcript fragment
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Turn ordinal the fragment belongs to
        #[serde(default)]
        turn: u64,
        /// The finalized text
        transcript: String,
    },

    /// Assistant audio chunk
    #[serde(rename = "response.output_audio.delta")]
    AudioDelta {
        /// Turn ordinal the audio belongs to
        #[serde(default)]
        turn: u64,
        /// Base64 PCM16 payload
        delta: String,
    },

    /// Finalized assistant transcript fragment
    #[serde(rename = "response.output_audio_transcript.done")]
    AudioTranscriptDone {
        /// Turn ordinal the fragment belongs to
        #[serde(default)]
        turn: u64,
        /// The finalized text
        transcript: String,
    },

    /// Turn completion marker
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Completed turn ordinal
        #[serde(default)]
        turn: u64,
    },

    /// Peer-reported error
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ErrorDetail,
    },

    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}

/// Payload of a peer error frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, when present
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Values substituted into the instruction templates.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// User age in years
    pub user_age: u32,
    /// Display name of the user's native language
    pub native_language: String,
    /// Display name of the session language
    pub learning_language: String,
    /// Comprehension level for the session language, as an age
    pub comprehension_age: u32,
    /// Sleep phrase for the session language
    pub sleep_word: String,
    /// Formatted memory block from previous sessions
    pub memory: String,
}

impl PromptContext {
    /// Substitute every placeholder in `template`.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{user_age}", &self.user_age.to_string())
            .replace("{native_language}", &self.native_language)
            .replace("{learning_language}", &self.learning_language)
            .replace("{comprehension_age}", &self.comprehension_age.to_string())
            .replace("{sleep_word}", &self.sleep_word)
            .replace("{memory}", &self.memory)
    }
}

/// Build the `session.update` event from rendered templates.
#[must_use]
pub fn session_update(realtime: &RealtimeConfig, ctx: &PromptContext) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionConfig {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: ctx.render(&realtime.instructions),
            voice: realtime.voice.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: TRANSCRIPTION_MODEL.to_string(),
                prompt: ctx.render(&realtime.transcription_prompt),
            },
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: VAD_THRESHOLD,
                prefix_padding_ms: VAD_PREFIX_PADDING_MS,
                silence_duration_ms: VAD_SILENCE_MS,
            },
        },
    }
}

/// Build the greeting `response.create` event.
#[must_use]
pub fn greeting_request(realtime: &RealtimeConfig, ctx: &PromptContext) -> ClientEvent {
    let instructions = ctx.render(&realtime.greeting_instructions);
    ClientEvent::ResponseCreate {
        response: if instructions.is_empty() {
            None
        } else {
            Some(ResponseRequest {
                instructions: Some(instructions),
            })
        },
    }
}

/// Build a system-note `conversation.item.create` event.
#[must_use]
pub fn system_note(text: &str) -> ClientEvent {
    ClientEvent::ConversationItemCreate {
        item: ConversationItem {
            kind: "message".to_string(),
            role: "system".to_string(),
            content: vec![ItemContent {
                kind: "input_text".to_string(),
                text: text.to_string(),
            }],
        },
    }
}

/// Encode PCM16 samples for an `input_audio_buffer.append` payload.
#[must_use]
pub fn encode_audio(samples: &[i16]) -> String {
    BASE64.encode(pcm16_to_bytes(samples))
}

/// Decode a base64 PCM16 payload into samples.
///
/// # Errors
///
/// Returns `Error::Protocol` on invalid base64 or an odd byte count.
pub fn decode_audio(payload: &str) -> Result<Vec<i16>> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| crate::Error::Protocol(format!("invalid audio payload: {e}")))?;
    bytes_to_pcm16(&bytes)
}
