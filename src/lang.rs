//! Per-utterance language identification
//!
//! Stateless detection over finalized transcript fragments, restricted
//! to the configured languages. Anything too short or too ambiguous
//! comes back as the undetermined tag rather than a guess.

use std::collections::HashMap;

use whatlang::{Detector, Lang};

/// IANA tag reported when no confident identification exists
pub const UNDETERMINED: &str = "und";

/// Fragments shorter than this are never classified
pub const MIN_FRAGMENT_CHARS: usize = 4;

/// One identification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Configured language code, or [`UNDETERMINED`]
    pub language: String,
    /// Detector confidence in 0.0..=1.0
    pub confidence: f64,
}

impl Detection {
    /// The no-answer result.
    #[must_use]
    pub fn undetermined() -> Self {
        Self {
            language: UNDETERMINED.to_string(),
            confidence: 0.0,
        }
    }

    /// Whether this is a real identification.
    #[must_use]
    pub fn is_determined(&self) -> bool {
        self.language != UNDETERMINED
    }
}

/// Language identification capability. Stateless per fragment.
pub trait LanguageDetector: Send + Sync {
    /// Identify the language of a finalized fragment.
    fn detect(&self, text: &str) -> Detection;
}

/// Statistical detector restricted to an allowlist of configured codes.
pub struct WhatlangDetector {
    detector: Detector,
    codes: HashMap<Lang, String>,
    floor: f64,
}

impl WhatlangDetector {
    /// Build a detector for the given language codes.
    ///
    /// Codes without detection support are skipped with a warning; an
    /// empty usable allowlist falls back to unrestricted detection.
    #[must_use]
    pub fn new(codes: &[String], floor: f64) -> Self {
        let mut allow = Vec::new();
        let mut map = HashMap::new();
        for code in codes {
            match lang_for_code(code) {
                Some(lang) => {
                    allow.push(lang);
                    map.insert(lang, code.clone());
                }
                None => tracing::warn!(code = %code, "no detection support for language"),
            }
        }
        let detector = if allow.is_empty() {
            Detector::new()
        } else {
            Detector::with_allowlist(allow)
        };
        Self {
            detector,
            codes: map,
            floor,
        }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Detection {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_FRAGMENT_CHARS {
            return Detection::undetermined();
        }
        match self.detector.detect(trimmed) {
            Some(info) if info.confidence() >= self.floor => {
                let language = self.codes.get(&info.lang()).map_or_else(
                    || info.lang().code().to_string(),
                    Clone::clone,
                );
                Detection {
                    language,
                    confidence: info.confidence(),
                }
            }
            _ => Detection::undetermined(),
        }
    }
}

/// ISO 639-1 code to detector language, for the codes a profile can
/// plausibly configure.
fn lang_for_code(code: &str) -> Option<Lang> {
    let lang = match code {
        "en" => Lang::Eng,
        "ko" => Lang::Kor,
        "ja" => Lang::Jpn,
        "zh" => Lang::Cmn,
        "es" => Lang::Spa,
        "fr" => Lang::Fra,
        "de" => Lang::Deu,
        "it" => Lang::Ita,
        "pt" => Lang::Por,
        "nl" => Lang::Nld,
        "ru" => Lang::Rus,
        "uk" => Lang::Ukr,
        "pl" => Lang::Pol,
        "cs" => Lang::Ces,
        "sv" => Lang::Swe,
        "da" => Lang::Dan,
        "fi" => Lang::Fin,
        "nb" | "no" => Lang::Nob,
        "hu" => Lang::Hun,
        "ro" => Lang::Ron,
        "bg" => Lang::Bul,
        "el" => Lang::Ell,
        "tr" => Lang::Tur,
        "ar" => Lang::Ara,
        "he" => Lang::Heb,
        "hi" => Lang::Hin,
        "th" => Lang::Tha,
        "vi" => Lang::Vie,
        "id" => Lang::Ind,
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(codes: &[&str], floor: f64) -> WhatlangDetector {
        let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
        WhatlangDetector::new(&codes, floor)
    }

    #[test]
    fn identifies_allowlisted_scripts() {
        let d = detector(&["en", "ko"], 0.5);

        let en = d.detect("the quick brown fox jumps over the lazy dog");
        assert_eq!(en.language, "en");
        assert!(en.confidence >= 0.5);

        let ko = d.detect("안녕하세요 오늘은 뭐 하고 싶어요");
        assert_eq!(ko.language, "ko");
    }

    #[test]
    fn short_fragment_is_undetermined() {
        let d = detector(&["en", "ko"], 0.5);
        assert_eq!(d.detect("hi").language, UNDETERMINED);
        assert_eq!(d.detect("  a  ").language, UNDETERMINED);
        assert_eq!(d.detect("").language, UNDETERMINED);
    }

    #[test]
    fn low_confidence_is_undetermined() {
        // An impossible floor forces the undetermined path for any text
        let d = detector(&["en", "ko"], 1.1);
        let result = d.detect("the quick brown fox jumps over the lazy dog");
        assert_eq!(result.language, UNDETERMINED);
        assert!(!result.is_determined());
    }

    #[test]
    fn unsupported_code_is_skipped() {
        let d = detector(&["xx", "ko"], 0.5);
        let ko = d.detect("안녕하세요 만나서 반가워요");
        assert_eq!(ko.language, "ko");
    }

    #[test]
    fn undetermined_constructor_shape() {
        let u = Detection::undetermined();
        assert_eq!(u.language, "und");
        assert!(u.confidence.abs() < f64::EPSILON);
        assert!(!u.is_determined());
    }
}
