//! # Symbol Translator
//!
//! Fixed ARPAbet → IPA table. Every CMU phoneme, with and without a stress
//! digit, has an entry; a few extras (syllabic consonants, the nasal flap) are
//! included so the table stays total over what a dictionary can produce.
//!
//! ## Notes on the table:
//! - **Stress**: only `AH` and `ER` change with stress. Unstressed `AH0` is
//!   schwa `ə` and unstressed `ER0` is `ɚ`; every other vowel ignores the digit.
//! - **Clusters**: diphthongs and affricates are two characters (`aɪ`, `tʃ`),
//!   syllabic consonants are a base letter plus a combining mark (`m̩`).
//! - **Unknown symbols** translate to nothing; the aggregator gives them a neutral score.

use crate::scoring::{CoarsePhoneme, FineSymbol, TranslatedPhoneme};

/// IPA string for one coarse phoneme, or `""` if the symbol is unknown.
pub fn ipa_for(phoneme: &CoarsePhoneme) -> &'static str {
    let unstressed = phoneme.stress() == Some(0);
    match phoneme.base() {
        // Monophthongs
        "AA" => "ɑ",
        "AE" => "æ",
        "AH" if unstressed => "ə",
        "AH" => "ʌ",
        "AO" => "ɔ",
        "EH" => "ɛ",
        "ER" if unstressed => "ɚ",
        "ER" => "ɝ",
        "IH" => "ɪ",
        "IY" => "i",
        "UH" => "ʊ",
        "UW" => "u",

        // Diphthongs
        "AW" => "aʊ",
        "AY" => "aɪ",
        "EY" => "eɪ",
        "OW" => "oʊ",
        "OY" => "ɔɪ",

        // Consonants
        "P" => "p",
        "B" => "b",
        "T" => "t",
        "D" => "d",
        "K" => "k",
        "G" => "g",
        "CH" => "tʃ",
        "JH" => "dʒ",
        "F" => "f",
        "V" => "v",
        "TH" => "θ",
        "DH" => "ð",
        "S" => "s",
        "Z" => "z",
        "SH" => "ʃ",
        "ZH" => "ʒ",
        "HH" => "h",
        "M" => "m",
        "N" => "n",
        "NG" => "ŋ",
        "L" => "l",
        "R" => "ɹ",
        "W" => "w",
        "Y" => "j",

        // Syllabic consonants and the nasal flap
        "EM" => "m\u{0329}",
        "EN" => "n\u{0329}",
        "EL" => "l\u{0329}",
        "NX" => "ɾ\u{0303}",

        _ => "",
    }
}

/// Ordered fine symbols for one coarse phoneme.
pub fn translate(phoneme: &CoarsePhoneme) -> Vec<FineSymbol> {
    ipa_for(phoneme).chars().collect()
}

/// Translate a whole transcription, keeping the coarse symbol next to its cluster.
pub fn translate_sequence(phonemes: &[CoarsePhoneme]) -> Vec<TranslatedPhoneme> {
    phonemes
        .iter()
        .map(|phoneme| TranslatedPhoneme::new(phoneme.clone(), translate(phoneme)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMU_PHONEMES: [&str; 39] = [
        "AA", "AE", "AH", "AO", "AW", "AY", "B", "CH", "D", "DH", "EH", "ER", "EY", "F", "G",
        "HH", "IH", "IY", "JH", "K", "L", "M", "N", "NG", "OW", "OY", "P", "R", "S", "SH", "T",
        "TH", "UH", "UW", "V", "W", "Y", "Z", "ZH",
    ];

    #[test]
    fn test_every_cmu_phoneme_translates() {
        for base in CMU_PHONEMES {
            assert!(!translate(&CoarsePhoneme::new(base)).is_empty(), "{base}");
        }
    }

    #[test]
    fn test_stress_variants() {
        assert_eq!(ipa_for(&"AH0".into()), "ə");
        assert_eq!(ipa_for(&"AH1".into()), "ʌ");
        assert_eq!(ipa_for(&"AH2".into()), "ʌ");
        assert_eq!(ipa_for(&"AH".into()), "ʌ");
        assert_eq!(ipa_for(&"ER0".into()), "ɚ");
        assert_eq!(ipa_for(&"ER1".into()), "ɝ");
        assert_eq!(ipa_for(&"IY0".into()), ipa_for(&"IY1".into()));
    }

    #[test]
    fn test_multi_symbol_clusters() {
        assert_eq!(translate(&"AY1".into()), vec!['a', 'ɪ']);
        assert_eq!(translate(&"CH".into()), vec!['t', 'ʃ']);
        assert_eq!(translate(&"EM".into()), vec!['m', '\u{0329}']);
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        assert!(translate(&"QX".into()).is_empty());
        assert!(translate(&"".into()).is_empty());
    }

    #[test]
    fn test_translate_sequence_keeps_order() {
        let sequence: Vec<CoarsePhoneme> = ["K", "AE1", "T"].into_iter().map(Into::into).collect();
        let translated = translate_sequence(&sequence);
        let clusters: Vec<String> = translated.iter().map(|t| t.cluster.iter().collect()).collect();
        assert_eq!(clusters, vec!["k", "æ", "t"]);
        assert_eq!(translated[1].coarse.as_str(), "AE1");
    }
}
