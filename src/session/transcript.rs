//! Turn-ordered conversation transcript
//!
//! Fragments carry the turn ordinal assigned by the peer; the transcript
//! keeps them sorted by that ordinal so network arrival order never
//! changes what the summarizer sees.

use serde::{Deserialize, Serialize};

/// Who produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human user
    User,
    /// The remote assistant
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    /// Peer-assigned turn ordinal
    pub turn: u64,
    /// Who spoke
    pub speaker: Speaker,
    /// The finalized text
    pub text: String,
}

/// Ordered collection of finalized fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    fragments: Vec<TranscriptFragment>,
}

impl Transcript {
    /// Empty transcript.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    /// Insert a fragment in turn order.
    ///
    /// Fragments with the same turn keep their arrival order relative to
    /// each other, so a user utterance and the reply to it stay adjacent.
    pub fn push(&mut self, turn: u64, speaker: Speaker, text: impl Into<String>) {
        let fragment = TranscriptFragment {
            turn,
            speaker,
            text: text.into(),
        };
        let at = self.fragments.partition_point(|f| f.turn <= turn);
        self.fragments.insert(at, fragment);
    }

    /// Whether any fragment was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Number of fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Fragments in turn order.
    #[must_use]
    pub fn fragments(&self) -> &[TranscriptFragment] {
        &self.fragments
    }

    /// User utterances in turn order.
    #[must_use]
    pub fn user_utterances(&self) -> Vec<&str> {
        self.fragments
            .iter()
            .filter(|f| f.speaker == Speaker::User)
            .map(|f| f.text.as_str())
            .collect()
    }

    /// Full transcript as `speaker: text` lines.
    #[must_use]
    pub fn format_full(&self) -> String {
        self.fragments
            .iter()
            .map(|f| format!("{}: {}", f.speaker, f.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Transcript tail within a character budget.
    ///
    /// The newest lines survive; truncation lands mid-line rather than
    /// dropping whole fragments, matching what a prompt budget needs.
    #[must_use]
    pub fn format_tail(&self, max_chars: usize) -> String {
        let full = self.format_full();
        let count = full.chars().count();
        if count <= max_chars {
            return full;
        }
        full.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_sort_by_turn_not_arrival() {
        let mut t = Transcript::new();
        t.push(2, Speaker::Assistant, "the reply");
        t.push(1, Speaker::User, "the question");
        t.push(3, Speaker::User, "a follow-up");

        let turns: Vec<u64> = t.fragments().iter().map(|f| f.turn).collect();
        assert_eq!(turns, vec![1, 2, 3]);
        assert_eq!(t.fragments()[0].text, "the question");
    }

    #[test]
    fn same_turn_keeps_arrival_order() {
        let mut t = Transcript::new();
        t.push(1, Speaker::User, "hello");
        t.push(1, Speaker::Assistant, "hi there");
        assert_eq!(t.fragments()[0].speaker, Speaker::User);
        assert_eq!(t.fragments()[1].speaker, Speaker::Assistant);
    }

    #[test]
    fn format_full_tags_speakers() {
        let mut t = Transcript::new();
        t.push(1, Speaker::User, "hello");
        t.push(2, Speaker::Assistant, "hi");
        assert_eq!(t.format_full(), "user: hello\nassistant: hi");
    }

    #[test]
    fn tail_keeps_newest_characters() {
        let mut t = Transcript::new();
        t.push(1, Speaker::User, "aaaa");
        t.push(2, Speaker::User, "bbbb");
        let tail = t.format_tail(10);
        assert_eq!(tail.chars().count(), 10);
        assert!(tail.ends_with("user: bbbb"));
    }

    #[test]
    fn tail_under_budget_is_untouched() {
        let mut t = Transcript::new();
        t.push(1, Speaker::User, "short");
        assert_eq!(t.format_tail(1000), "user: short");
    }

    #[test]
    fn user_utterances_filter_assistant_lines() {
        let mut t = Transcript::new();
        t.push(1, Speaker::User, "one");
        t.push(2, Speaker::Assistant, "two");
        t.push(3, Speaker::User, "three");
        assert_eq!(t.user_utterances(), vec!["one", "three"]);
    }

    #[test]
    fn empty_transcript_reports_empty() {
        let t = Transcript::new();
        assert!(t.is_empty());
        assert_eq!(t.len(), 0);
        assert_eq!(t.format_full(), "");
    }
}
