//! Hearth - always-listening voice companion
//!
//! This library provides the core functionality for the Hearth companion:
//! - Audio device arbitration (one microphone, one speaker, many consumers)
//! - Wake word detection on the idle input stream
//! - Realtime speech sessions over a JSON WebSocket protocol
//! - Durable per-profile memory distilled from session transcripts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Audio Device                       │
//! │           microphone  │  speaker (cpal)              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  AudioChannel                        │
//! │     input role arbiter  │  output sink  │  cues     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Daemon                           │
//! │   Wake Word  │  Session  │  Memory  │  Observer     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Realtime speech peer                    │
//! │            JSON events over WebSocket                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lang;
pub mod memory;
pub mod observer;
pub mod session;
pub mod sleep;
pub mod wake;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use lang::{Detection, LanguageDetector, WhatlangDetector};
pub use memory::{MemoryItem, MemoryKind, MemoryRecord, MemoryStore, Summarizer};
pub use observer::ObserverEvent;
pub use session::{
    ConversationSession, EndReason, SessionContext, SessionOutcome, SessionPhase, Transcript,
};
pub use sleep::SleepWordMatcher;
pub use wake::{WakeEvent, WakeScorer, WakeWordDetector};
