//! # Coarse-Unit Aggregator
//!
//! Collapses the per-symbol scores back into one score per coarse phoneme.
//! A running cursor walks the flat score list; each phoneme takes exactly as
//! many scores as its cluster is wide and reports their mean.

use super::normalize::round_to_tenth;
use super::types::{CoarsePhonemeScore, NormalizedScore, TranslatedPhoneme};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub scores: Vec<CoarsePhonemeScore>,
    /// Set when the cluster widths did not add up to the number of scores
    /// and phonemes were paired with scores by position instead.
    pub positional_fallback: bool,
}

/// Aggregate normalized fine-symbol scores per coarse phoneme.
///
/// - A phoneme with no translation (width 0) gets `empty_cluster_score`.
/// - A phoneme whose whole cluster was dropped for being outside the acoustic
///   vocabulary has nothing to report and is left out of the result.
/// - If the widths do not add up to `scores.len()`, phonemes and scores are
///   zipped one to one. The result is lossy but well formed.
pub fn aggregate(
    phonemes: &[TranslatedPhoneme],
    scores: &[NormalizedScore],
    empty_cluster_score: f32,
) -> Aggregation {
    let scorable: Vec<&TranslatedPhoneme> =
        phonemes.iter().filter(|p| !p.fully_dropped()).collect();

    let expected: usize = scorable.iter().map(|p| p.width()).sum();
    if expected != scores.len() {
        warn!(
            expected,
            produced = scores.len(),
            "Phoneme cluster widths do not match the number of scores, pairing by position"
        );
        let scores = scorable
            .iter()
            .zip(scores)
            .map(|(phoneme, &score)| CoarsePhonemeScore {
                phoneme: phoneme.coarse.clone(),
                score,
            })
            .collect();
        return Aggregation {
            scores,
            positional_fallback: true,
        };
    }

    let mut cursor = 0;
    let scores = scorable
        .into_iter()
        .map(|phoneme| {
            let width = phoneme.width();
            let slice = &scores[cursor..cursor + width];
            cursor += width;

            let score = if slice.is_empty() {
                empty_cluster_score
            } else {
                let total: f32 = slice.iter().map(NormalizedScore::value).sum();
                round_to_tenth(total / slice.len() as f32)
            };

            CoarsePhonemeScore {
                phoneme: phoneme.coarse.clone(),
                score: NormalizedScore(score),
            }
        })
        .collect();

    Aggregation {
        scores,
        positional_fallback: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::types::CoarsePhoneme;
    use proptest::prelude::*;

    fn phoneme(symbol: &str, cluster: &str) -> TranslatedPhoneme {
        TranslatedPhoneme::new(CoarsePhoneme::new(symbol), cluster.chars().collect())
    }

    fn values(aggregation: &Aggregation) -> Vec<f32> {
        aggregation.scores.iter().map(|s| s.score.value()).collect()
    }

    #[test]
    fn test_mean_per_cluster() {
        let phonemes = vec![phoneme("K", "k"), phoneme("AY1", "aɪ"), phoneme("T", "t")];
        let scores = [4.0, 3.0, 4.0, 5.0].map(NormalizedScore);
        let result = aggregate(&phonemes, &scores, 2.5);
        assert!(!result.positional_fallback);
        assert_eq!(values(&result), vec![4.0, 3.5, 5.0]);
        assert_eq!(result.scores[1].phoneme.as_str(), "AY1");
    }

    #[test]
    fn test_empty_translation_gets_neutral_score() {
        let phonemes = vec![phoneme("K", "k"), phoneme("QQ", ""), phoneme("T", "t")];
        let scores = [5.0, 4.0].map(NormalizedScore);
        let result = aggregate(&phonemes, &scores, 2.5);
        assert_eq!(values(&result), vec![5.0, 2.5, 4.0]);
    }

    #[test]
    fn test_fully_dropped_phoneme_is_omitted() {
        let mut dropped = phoneme("AE1", "æ");
        dropped.cluster.clear();
        let phonemes = vec![phoneme("K", "k"), dropped, phoneme("T", "t")];
        let scores = [5.0, 4.0].map(NormalizedScore);
        let result = aggregate(&phonemes, &scores, 2.5);
        assert!(!result.positional_fallback);
        let symbols: Vec<_> = result.scores.iter().map(|s| s.phoneme.as_str()).collect();
        assert_eq!(symbols, vec!["K", "T"]);
    }

    #[test]
    fn test_width_mismatch_pairs_by_position() {
        let phonemes = vec![phoneme("K", "k"), phoneme("AY1", "aɪ"), phoneme("T", "t")];
        let scores = [4.0, 3.0].map(NormalizedScore);
        let result = aggregate(&phonemes, &scores, 2.5);
        assert!(result.positional_fallback);
        assert_eq!(values(&result), vec![4.0, 3.0]);
    }

    proptest! {
        #[test]
        fn prop_each_phoneme_consumes_its_width(
            widths in prop::collection::vec(0usize..4, 1..12),
            seed in prop::collection::vec(10u8..=50, 48),
        ) {
            let phonemes: Vec<TranslatedPhoneme> = widths
                .iter()
                .map(|&w| TranslatedPhoneme::new(CoarsePhoneme::new("X"), vec!['x'; w]))
                .collect();
            let total: usize = widths.iter().sum();
            let scores: Vec<NormalizedScore> = seed
                .iter()
                .take(total)
                .map(|&s| NormalizedScore(s as f32 / 10.0))
                .collect();

            let result = aggregate(&phonemes, &scores, 2.5);
            prop_assert!(!result.positional_fallback);
            prop_assert_eq!(result.scores.len(), phonemes.len());

            let mut cursor = 0;
            for (width, score) in widths.iter().zip(&result.scores) {
                if *width == 0 {
                    prop_assert_eq!(score.score.value(), 2.5);
                } else {
                    let slice = &scores[cursor..cursor + width];
                    let mean = slice.iter().map(|s| s.value()).sum::<f32>() / *width as f32;
                    prop_assert!((score.score.value() - mean).abs() <= 0.05 + 1e-4);
                }
                cursor += width;
            }
            prop_assert_eq!(cursor, scores.len());
        }
    }
}
