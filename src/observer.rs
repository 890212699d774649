//! Session observation events
//!
//! Emits state transitions and transcript fragments to an optional
//! in-process observer (a display, a debug tail). Publishing is
//! best-effort: with no subscriber the events go nowhere, and core
//! behavior is identical either way.
//!
//! Initialize once at startup with [`init_observer`], then call
//! [`publish`] anywhere.

use std::sync::OnceLock;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber before lagging drops the oldest
const CHANNEL_CAPACITY: usize = 64;

static SENDER: OnceLock<broadcast::Sender<ObserverEvent>> = OnceLock::new();

/// An event an observer may render.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A wake model crossed its threshold
    WakeTriggered {
        /// Model identifier
        model: String,
        /// Confidence at trigger
        score: f32,
    },

    /// The session entered a new phase
    Phase {
        /// Session this event belongs to
        session_id: Uuid,
        /// Phase name
        phase: String,
    },

    /// A finalized transcript fragment was captured
    Fragment {
        /// Session this event belongs to
        session_id: Uuid,
        /// Who spoke
        speaker: String,
        /// The finalized text
        text: String,
    },

    /// A session finished and its transcript was handed off
    SessionEnded {
        /// Session this event belongs to
        session_id: Uuid,
        /// Why it ended
        reason: String,
        /// Fragments captured
        fragments: usize,
    },

    /// A memory record was merged and persisted
    MemoryMerged {
        /// Profile the record belongs to
        profile: String,
        /// Session notes now in the record
        sessions: usize,
    },
}

/// Initialize the global observer channel.
///
/// No-op if already initialized. Call once at daemon startup.
pub fn init_observer() {
    if SENDER.set(broadcast::channel(CHANNEL_CAPACITY).0).is_ok() {
        tracing::debug!("observer channel initialized");
    }
}

/// Subscribe to observer events.
///
/// Returns `None` when [`init_observer`] has not been called.
#[must_use]
pub fn subscribe() -> Option<broadcast::Receiver<ObserverEvent>> {
    SENDER.get().map(broadcast::Sender::subscribe)
}

/// Publish an event (best-effort, never blocks).
///
/// No-op when uninitialized or when no subscriber is listening.
pub fn publish(event: ObserverEvent) {
    if let Some(sender) = SENDER.get() {
        // send only fails when there are no receivers, which is fine
        drop(sender.send(event));
    }
}
