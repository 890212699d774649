//! Durable per-profile memory
//!
//! One YAML record per profile holds what the companion remembers across
//! sessions: a rolling summary, learning progress, recent items to avoid
//! repeating, and a note per past session. Records are merged
//! append-plus-compaction at session end and written atomically; a failed
//! summarization degrades to a deterministic fallback note rather than
//! dropping the session.

mod summarize;

pub use summarize::{HttpSummarizer, Summarizer, SummaryData};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SummaryConfig;
use crate::observer::{self, ObserverEvent};
use crate::session::SessionOutcome;
use crate::{Error, Result};

/// Session notes kept per record, oldest evicted
const MAX_SESSION_NOTES: usize = 20;

/// Entries kept per progress list
const PROGRESS_TAIL: usize = 10;

/// User requests kept, duplicate-free
const REQUEST_TAIL: usize = 10;

/// Items rendered per kind in the prompt block
const PROMPT_ITEMS_PER_KIND: usize = 3;

/// Characters of transcript tail used for the no-utterance fallback note
const FALLBACK_SNIPPET_CHARS: usize = 200;

/// Note recorded for a session with an empty transcript
const NO_INTERACTION_NOTE: &str = "no interaction";

/// Kinds of durable memory items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A running joke
    Joke,
    /// A vocabulary word that came up
    Vocab,
    /// A story that was told
    Story,
    /// A fact the user shared or learned
    Fact,
    /// A conversation topic
    Topic,
}

impl MemoryKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 5] = [Self::Joke, Self::Vocab, Self::Story, Self::Fact, Self::Topic];

    /// How many items of this kind a record retains.
    #[must_use]
    pub const fn cap(self) -> usize {
        match self {
            Self::Joke | Self::Story => 10,
            Self::Vocab => 20,
            Self::Fact | Self::Topic => 15,
        }
    }

    /// Plural label for the prompt block.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Joke => "jokes",
            Self::Vocab => "vocabulary",
            Self::Story => "stories",
            Self::Fact => "facts",
            Self::Topic => "topics",
        }
    }
}

/// One durable memory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// What kind of item this is
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    /// The item itself
    pub text: String,
}

/// Learning progress extracted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    /// Vocabulary recently learned
    pub new_vocab: Vec<String>,
    /// Recurring mistakes
    pub mistakes: Vec<String>,
    /// Things going well
    pub strengths: Vec<String>,
    /// Suggested focus for the next session
    pub next_focus: String,
}

impl Progress {
    fn is_empty(&self) -> bool {
        self.new_vocab.is_empty()
            && self.mistakes.is_empty()
            && self.strengths.is_empty()
            && self.next_focus.trim().is_empty()
    }
}

/// Note kept per finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNote {
    /// Session this note belongs to
    pub session_id: Uuid,
    /// When the session ended
    pub ended_at: DateTime<Utc>,
    /// Why it ended
    pub end_reason: String,
    /// Short durable note (summary or fallback)
    pub note: String,
}

/// Everything remembered for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRecord {
    /// Rolling summary across sessions
    pub summary: String,
    /// Learning progress
    pub progress: Progress,
    /// Recent items, capped per kind
    pub recent_items: Vec<MemoryItem>,
    /// Recent user requests, duplicate-free
    pub recent_user_requests: Vec<String>,
    /// Notes for past sessions, duplicate-free by session id
    pub sessions: Vec<SessionNote>,
    /// Last merge time
    pub updated_at: DateTime<Utc>,
}

impl Default for MemoryRecord {
    fn default() -> Self {
        Self {
            summary: String::new(),
            progress: Progress::default(),
            recent_items: Vec::new(),
            recent_user_requests: Vec::new(),
            sessions: Vec::new(),
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl MemoryRecord {
    /// Fold summarizer output into the record.
    ///
    /// Union semantics throughout: existing entries keep their order,
    /// new ones append, duplicates are skipped, and every list is
    /// capped from the front so the oldest entries age out.
    pub fn merge(&mut self, data: &SummaryData) {
        if !data.summary.trim().is_empty() {
            self.summary = data.summary.trim().to_string();
        }
        union_tail(&mut self.progress.new_vocab, &data.progress.new_vocab, PROGRESS_TAIL);
        union_tail(&mut self.progress.mistakes, &data.progress.mistakes, PROGRESS_TAIL);
        union_tail(&mut self.progress.strengths, &data.progress.strengths, PROGRESS_TAIL);
        if !data.progress.next_focus.trim().is_empty() {
            self.progress.next_focus = data.progress.next_focus.trim().to_string();
        }
        self.merge_items(&data.recent_items);
        union_tail(
            &mut self.recent_user_requests,
            &data.recent_user_requests,
            REQUEST_TAIL,
        );
    }

    fn merge_items(&mut self, incoming: &[MemoryItem]) {
        for item in incoming {
            if item.text.trim().is_empty() {
                continue;
            }
            let exists = self
                .recent_items
                .iter()
                .any(|e| e.kind == item.kind && e.text == item.text);
            if !exists {
                self.recent_items.push(item.clone());
            }
        }
        for kind in MemoryKind::ALL {
            let count = self.recent_items.iter().filter(|i| i.kind == kind).count();
            if count > kind.cap() {
                let mut excess = count - kind.cap();
                self.recent_items.retain(|i| {
                    if i.kind == kind && excess > 0 {
                        excess -= 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }
    }

    /// Append a session note unless one with the same id exists.
    ///
    /// Returns whether the note was added; re-merging a session is a
    /// timestamp-only no-op.
    pub fn note_session(&mut self, note: SessionNote) -> bool {
        if self.sessions.iter().any(|s| s.session_id == note.session_id) {
            return false;
        }
        self.sessions.push(note);
        if self.sessions.len() > MAX_SESSION_NOTES {
            let excess = self.sessions.len() - MAX_SESSION_NOTES;
            self.sessions.drain(..excess);
        }
        true
    }

    /// Render the memory block injected into session instructions.
    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        if !self.summary.trim().is_empty() {
            lines.push(format!("Summary: {}", self.summary.trim()));
        }
        if !self.recent_user_requests.is_empty() {
            lines.push(format!(
                "Recent requests: {}",
                self.recent_user_requests.join("; ")
            ));
        }
        if !self.progress.is_empty() {
            if !self.progress.new_vocab.is_empty() {
                lines.push(format!("New vocabulary: {}", self.progress.new_vocab.join(", ")));
            }
            if !self.progress.mistakes.is_empty() {
                lines.push(format!("Common mistakes: {}", self.progress.mistakes.join(", ")));
            }
            if !self.progress.strengths.is_empty() {
                lines.push(format!("Strengths: {}", self.progress.strengths.join(", ")));
            }
            if !self.progress.next_focus.trim().is_empty() {
                lines.push(format!("Next focus: {}", self.progress.next_focus.trim()));
            }
        }
        for kind in MemoryKind::ALL {
            let texts: Vec<&str> = self
                .recent_items
                .iter()
                .filter(|i| i.kind == kind)
                .map(|i| i.text.as_str())
                .collect();
            if texts.is_empty() {
                continue;
            }
            let tail = &texts[texts.len().saturating_sub(PROMPT_ITEMS_PER_KIND)..];
            lines.push(format!(
                "Recent {} (avoid repeating): {}",
                kind.plural(),
                tail.join("; ")
            ));
        }
        if lines.is_empty() {
            "None".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Append trimmed, deduplicated entries and cap from the front.
fn union_tail(existing: &mut Vec<String>, incoming: &[String], cap: usize) {
    for entry in incoming {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !existing.iter().any(|e| e == trimmed) {
            existing.push(trimmed.to_string());
        }
    }
    if existing.len() > cap {
        let excess = existing.len() - cap;
        existing.drain(..excess);
    }
}

/// Deterministic note when the summarizer is unavailable.
///
/// Returns the note text and the user utterances to record as recent
/// requests.
fn fallback(transcript: &crate::session::Transcript) -> (String, Vec<String>) {
    let utterances: Vec<String> = transcript
        .user_utterances()
        .iter()
        .map(ToString::to_string)
        .collect();
    let note = if utterances.is_empty() {
        transcript.format_tail(FALLBACK_SNIPPET_CHARS)
    } else {
        let tail = &utterances[utterances.len().saturating_sub(3)..];
        format!("Recent topics: {}", tail.join("; "))
    };
    (note, utterances)
}

/// Loads, merges, and persists memory records.
pub struct MemoryStore {
    dir: PathBuf,
    summary: SummaryConfig,
    summarizer: Arc<dyn Summarizer>,
}

impl MemoryStore {
    /// Create a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, summary: SummaryConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            dir: dir.into(),
            summary,
            summarizer,
        }
    }

    /// Path of the record file for a profile.
    #[must_use]
    pub fn record_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("memory_{profile}.yml"))
    }

    /// Load a profile's record.
    ///
    /// A missing file is an empty record. An unparsable file is moved
    /// aside as `<file>.corrupt` and logged, never silently destroyed.
    #[must_use]
    pub fn load(&self, profile: &str) -> MemoryRecord {
        let path = self.record_path(profile);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MemoryRecord::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "memory read failed");
                return MemoryRecord::default();
            }
        };
        match serde_yaml::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "memory record unparsable");
                preserve_corrupt(&path);
                MemoryRecord::default()
            }
        }
    }

    /// Summarize a finished session and merge it into the profile's record.
    ///
    /// An empty transcript skips the summarizer and records a
    /// [`NO_INTERACTION_NOTE`] session note; a failed summarization uses
    /// the deterministic fallback. Either way the record is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error only when the merged record cannot be written.
    pub async fn summarize_and_merge(
        &self,
        profile: &str,
        native_language: &str,
        outcome: &SessionOutcome,
    ) -> Result<MemoryRecord> {
        let mut record = self.load(profile);

        let note_text = if outcome.transcript.is_empty() {
            tracing::info!(
                profile,
                session_id = %outcome.session_id,
                "empty transcript, skipping summarizer"
            );
            NO_INTERACTION_NOTE.to_string()
        } else {
            let prompt = self.build_prompt(&record, native_language, outcome);
            match self.summarizer.summarize(&prompt).await {
                Ok(data) => {
                    let note = if data.summary.trim().is_empty() {
                        fallback(&outcome.transcript).0
                    } else {
                        data.summary.trim().to_string()
                    };
                    record.merge(&data);
                    note
                }
                Err(e) => {
                    tracing::warn!(profile, error = %e, "summarization failed, using fallback");
                    let (note, requests) = fallback(&outcome.transcript);
                    record.merge(&SummaryData {
                        recent_user_requests: requests,
                        ..SummaryData::default()
                    });
                    note
                }
            }
        };

        let added = record.note_session(SessionNote {
            session_id: outcome.session_id,
            ended_at: outcome.ended_at,
            end_reason: outcome.end_reason.to_string(),
            note: note_text,
        });
        if !added {
            tracing::debug!(
                profile,
                session_id = %outcome.session_id,
                "session already recorded, refreshing timestamp only"
            );
        }
        record.updated_at = Utc::now();
        self.persist(profile, &record)?;

        observer::publish(ObserverEvent::MemoryMerged {
            profile: profile.to_string(),
            sessions: record.sessions.len(),
        });
        tracing::info!(
            profile,
            session_id = %outcome.session_id,
            sessions = record.sessions.len(),
            "memory merged"
        );
        Ok(record)
    }

    fn build_prompt(
        &self,
        record: &MemoryRecord,
        native_language: &str,
        outcome: &SessionOutcome,
    ) -> String {
        let mut prompt = self.summary.prompt.replace("{native_language}", native_language);
        if !record.summary.trim().is_empty() {
            prompt.push_str("\n\nPrevious summary:\n");
            prompt.push_str(record.summary.trim());
        }
        prompt.push_str("\n\nTranscript:\n");
        prompt.push_str(&outcome.transcript.format_tail(self.summary.max_chars));
        prompt
    }

    /// Write the record atomically: a named temp file in the same
    /// directory is persisted over the target, so a crash mid-write
    /// leaves the previous record intact.
    fn persist(&self, profile: &str, record: &MemoryRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let yaml = serde_yaml::to_string(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, yaml.as_bytes())?;
        let path = self.record_path(profile);
        tmp.persist(&path)
            .map_err(|e| Error::Memory(format!("atomic replace failed: {e}")))?;
        tracing::debug!(path = %path.display(), "memory record written");
        Ok(())
    }
}

/// Move an unparsable record aside so nothing is silently lost.
fn preserve_corrupt(path: &Path) {
    let mut side = path.as_os_str().to_owned();
    side.push(".corrupt");
    let side = PathBuf::from(side);
    match std::fs::rename(path, &side) {
        Ok(()) => tracing::warn!(preserved = %side.display(), "corrupt record moved aside"),
        Err(e) => tracing::warn!(error = %e, "could not preserve corrupt record"),
    }
}
