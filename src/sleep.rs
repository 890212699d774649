//! Sleep phrase matching
//!
//! Fuzzy-matches finalized transcript fragments against the active
//! sleep phrase. Partial transcription deltas are never checked; only
//! fragments the peer has finalized reach the matcher, which keeps a
//! half-heard phrase from ending a session.

use std::sync::LazyLock;

use regex::Regex;

/// Punctuation stripped before comparison
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,.!?]").expect("valid regex"));

/// Matches utterances against a configured sleep phrase.
#[derive(Debug, Clone)]
pub struct SleepWordMatcher {
    phrase: String,
    threshold: u8,
}

impl SleepWordMatcher {
    /// Create a matcher for the given phrase and similarity threshold
    /// (percent).
    #[must_use]
    pub fn new(phrase: &str, threshold: u8) -> Self {
        Self {
            phrase: normalize(phrase),
            threshold,
        }
    }

    /// Similarity of a fragment to the sleep phrase, in percent.
    ///
    /// The fragment is normalized the same way the phrase was: common
    /// punctuation removed, whitespace trimmed, lowercased.
    #[must_use]
    pub fn score(&self, fragment: &str) -> u8 {
        let normalized = normalize(fragment);
        if normalized.is_empty() || self.phrase.is_empty() {
            return 0;
        }
        let similarity = strsim::normalized_levenshtein(&normalized, &self.phrase);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (similarity * 100.0).round() as u8;
        percent
    }

    /// Whether the fragment counts as the sleep phrase.
    #[must_use]
    pub fn matches(&self, fragment: &str) -> bool {
        let score = self.score(fragment);
        let matched = score >= self.threshold;
        if matched {
            tracing::info!(score, threshold = self.threshold, "sleep phrase matched");
        } else if score > self.threshold / 2 {
            tracing::trace!(score, threshold = self.threshold, "sleep phrase near miss");
        }
        matched
    }

    /// Configured threshold in percent
    #[must_use]
    pub const fn threshold(&self) -> u8 {
        self.threshold
    }
}

fn normalize(text: &str) -> String {
    PUNCTUATION.replace_all(text, "").trim().to_lowercase()
}
