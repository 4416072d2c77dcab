//! Wake word matching on decoder transcripts
//!
//! Both sides go through [`normalize`] before comparison, so "Ativação",
//! "ATIVACAO" and "ativacao" are the same word. Matching is plain substring
//! containment on the normalized text.

use unicode_normalization::UnicodeNormalization;

use super::TranscriptEvent;
use crate::{Error, Result};

/// Canonical comparable form of `text`
///
/// Lowercases, decomposes (NFD), strips combining diacritics and trims.
/// Total and idempotent.
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_diacritic(*c))
        .collect();
    folded.trim().to_string()
}

/// Whether `phrase` occurs in `transcript`; both must already be normalized
///
/// An empty phrase never matches.
#[must_use]
pub fn matches(transcript: &str, phrase: &str) -> bool {
    !phrase.is_empty() && transcript.contains(phrase)
}

fn is_combining_diacritic(c: char) -> bool {
    matches!(
        c,
        '\u{0300}'..='\u{036F}'
            | '\u{1AB0}'..='\u{1AFF}'
            | '\u{1DC0}'..='\u{1DFF}'
            | '\u{20D0}'..='\u{20FF}'
            | '\u{FE20}'..='\u{FE2F}'
    )
}

/// Watches transcript events for one configured phrase
#[derive(Debug, Clone)]
pub struct WakeWordMatcher {
    phrase: String,
    once_per_utterance: bool,
    fired_this_utterance: bool,
}

impl WakeWordMatcher {
    /// Create a matcher for `phrase`
    ///
    /// With `once_per_utterance`, a phrase repeated in later partials of the
    /// same utterance does not fire again until a final result starts a new
    /// utterance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the phrase is empty after normalization
    pub fn new(phrase: &str, once_per_utterance: bool) -> Result<Self> {
        let phrase = normalize(phrase);
        if phrase.is_empty() {
            return Err(Error::Config("wake phrase is empty".to_string()));
        }

        tracing::debug!(phrase = %phrase, once_per_utterance, "wake word matcher initialized");

        Ok(Self {
            phrase,
            once_per_utterance,
            fired_this_utterance: false,
        })
    }

    /// Normalized phrase being watched for
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Check one event, returning `true` when it should activate
    pub fn observe(&mut self, event: &TranscriptEvent) -> bool {
        let hit = matches(&normalize(event.text()), &self.phrase);
        let suppressed = self.once_per_utterance && self.fired_this_utterance;

        if event.is_final() {
            // Next event belongs to a new utterance
            self.fired_this_utterance = false;
        } else if hit {
            self.fired_this_utterance = true;
        }

        if hit && suppressed {
            tracing::debug!(phrase = %self.phrase, "repeat match in same utterance suppressed");
            return false;
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(text: &str) -> TranscriptEvent {
        TranscriptEvent::Partial(text.to_string())
    }

    fn final_(text: &str) -> TranscriptEvent {
        TranscriptEvent::Final(text.to_string())
    }

    #[test]
    fn test_normalize_folds_case_and_accents() {
        assert_eq!(normalize("  Ativação "), "ativacao");
        assert_eq!(normalize("Ativação"), normalize("ativacao"));
        assert_eq!(normalize("ÉLAN Über"), "elan uber");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for text in ["Ativação", "  São Paulo  ", "coração", "plain", "ñandú"] {
            let once = normalize(text);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_matches_is_substring_containment() {
        let transcript = normalize("Vou Ativar agora");
        assert!(matches(&transcript, &normalize("ativar")));
        assert!(matches(&transcript, &normalize("ATIVAR")));
        assert!(matches(&transcript, &normalize("ativa")));
        assert!(!matches(&transcript, &normalize("ativarx")));
        assert!(!matches(&transcript, ""));
    }

    #[test]
    fn test_empty_phrase_is_rejected() {
        assert!(WakeWordMatcher::new("   ", true).is_err());
        assert!(WakeWordMatcher::new("\u{0301}", true).is_err());
    }

    #[test]
    fn test_partial_and_final_both_fire() {
        let mut matcher = WakeWordMatcher::new("Ativar", true).unwrap();
        assert!(matcher.observe(&partial("vou ativar")));

        let mut matcher = WakeWordMatcher::new("Ativar", true).unwrap();
        assert!(matcher.observe(&final_("vou ativar agora")));
        assert!(!matcher.observe(&partial("nada")));
    }

    #[test]
    fn test_once_per_utterance_suppresses_repeats() {
        let mut matcher = WakeWordMatcher::new("ativar", true).unwrap();

        assert!(matcher.observe(&partial("ativar")));
        assert!(!matcher.observe(&partial("ativar agora")));
        assert!(!matcher.observe(&final_("ativar agora")));

        // New utterance
        assert!(matcher.observe(&partial("ativar")));
    }

    #[test]
    fn test_repeats_fire_without_suppression() {
        let mut matcher = WakeWordMatcher::new("ativar", false).unwrap();

        assert!(matcher.observe(&partial("ativar")));
        assert!(matcher.observe(&partial("ativar agora")));
        assert!(matcher.observe(&final_("ativar agora")));
    }

    #[test]
    fn test_final_rearms_for_next_utterance() {
        let mut matcher = WakeWordMatcher::new("ativar", true).unwrap();
        assert!(matcher.observe(&partial("ativar")));
        assert!(!matcher.observe(&final_("ativar")));
        assert!(matcher.observe(&partial("ativar")));
    }
}
