//! # Scoring Record Types
//!
//! Small, explicit records that flow through the scoring engine. Each stage
//! of the pipeline produces one of these and the next stage consumes it, so
//! the order-and-count invariants between stages are visible in the types.
//!
//! ## Rust Concepts:
//! - **Newtype pattern**: `CoarsePhoneme(String)` and `RawScore(f32)` wrap a
//!   primitive so a log-probability can never be passed where a 1-5 score is expected
//! - **Copy types**: scores are plain numbers and are cheap to copy around

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single character of the acoustic model's phonetic alphabet (IPA).
pub type FineSymbol = char;

/// One unit of the dictionary transcription alphabet (ARPAbet), stress digit included.
///
/// `"AH0"` and `"AH1"` are different phonemes here: the stress marker is part
/// of the identity and changes how the symbol is translated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoarsePhoneme(String);

impl CoarsePhoneme {
    /// Create a phoneme from its textual symbol. Symbols are upper-cased.
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The symbol without its stress digit (`"AE1"` → `"AE"`).
    pub fn base(&self) -> &str {
        self.0.trim_end_matches(|c: char| c.is_ascii_digit())
    }

    /// The stress digit, if the symbol carries one.
    pub fn stress(&self) -> Option<u8> {
        self.0
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as u8)
    }
}

impl fmt::Display for CoarsePhoneme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CoarsePhoneme {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

/// Log-probability of one fine symbol at its best frame.
///
/// `f32::NEG_INFINITY` marks a symbol that could not be placed because the
/// alignment ran out of frames.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct RawScore(pub f32);

impl RawScore {
    pub const WORST: RawScore = RawScore(f32::NEG_INFINITY);

    pub fn is_exhausted(&self) -> bool {
        self.0 == f32::NEG_INFINITY
    }
}

/// A score on the user-facing scale (1.0 to 5.0 by default), one decimal place.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedScore(pub f32);

impl NormalizedScore {
    pub fn value(&self) -> f32 {
        self.0
    }
}

/// A coarse phoneme together with the fine symbols it expands to.
///
/// `translated_width` remembers how many symbols the translation table
/// produced before any were dropped for being missing from the acoustic
/// vocabulary. That distinguishes two cases with an empty `cluster`:
/// - width 0: the symbol had no translation at all and gets the neutral score
/// - width > 0: every symbol was dropped, so the phoneme cannot be scored and is left out
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedPhoneme {
    pub coarse: CoarsePhoneme,
    pub cluster: Vec<FineSymbol>,
    pub translated_width: usize,
}

impl TranslatedPhoneme {
    pub fn new(coarse: CoarsePhoneme, cluster: Vec<FineSymbol>) -> Self {
        let translated_width = cluster.len();
        Self {
            coarse,
            cluster,
            translated_width,
        }
    }

    /// Number of scores this phoneme consumes during aggregation.
    pub fn width(&self) -> usize {
        self.cluster.len()
    }

    pub fn fully_dropped(&self) -> bool {
        self.translated_width > 0 && self.cluster.is_empty()
    }
}

/// Final per-phoneme result of the scoring engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarsePhonemeScore {
    pub phoneme: CoarsePhoneme,
    pub score: NormalizedScore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coarse_phoneme_parts() {
        let phoneme = CoarsePhoneme::new("ae1");
        assert_eq!(phoneme.as_str(), "AE1");
        assert_eq!(phoneme.base(), "AE");
        assert_eq!(phoneme.stress(), Some(1));

        let consonant = CoarsePhoneme::from("K");
        assert_eq!(consonant.base(), "K");
        assert_eq!(consonant.stress(), None);
    }

    #[test]
    fn test_fully_dropped_only_after_translation() {
        let untranslated = TranslatedPhoneme::new("XX".into(), vec![]);
        assert!(!untranslated.fully_dropped());

        let mut dropped = TranslatedPhoneme::new("EM".into(), vec!['m', '\u{0329}']);
        dropped.cluster.clear();
        assert!(dropped.fully_dropped());
        assert_eq!(dropped.width(), 0);
    }

    #[test]
    fn test_worst_raw_score() {
        assert!(RawScore::WORST.is_exhausted());
        assert!(!RawScore(-3.0).is_exhausted());
        assert!(RawScore::WORST < RawScore(-1000.0));
    }
}
