//! # Phoneme Scoring Engine
//!
//! Turns an acoustic probability matrix and a translated reference transcription
//! into one goodness-of-pronunciation score per reference phoneme.
//!
//! ## Pipeline:
//! ```text
//! TranslatedPhoneme[] ──resolve──▶ columns ──align──▶ RawScore[]
//!                                                        │
//!                                                    normalize
//!                                                        ▼
//! CoarsePhonemeScore[] ◀──aggregate── NormalizedScore[]
//! ```
//!
//! ## Key Components:
//! - **types**: The records passed between stages
//! - **matrix**: The probability matrix and its vocabulary
//! - **alignment**: Greedy monotonic windowed search (the cursor lives here)
//! - **normalize**: Clamp and rescale onto the user-facing range
//! - **aggregate**: Per-phoneme means, with the documented degraded fallbacks
//!
//! Nothing in here allocates a model or touches the network. Every function is
//! deterministic, which is what makes the property tests in each submodule possible.

pub mod aggregate;
pub mod alignment;
pub mod matrix;
pub mod normalize;
pub mod types;

pub use alignment::Aligner;
pub use matrix::{ProbabilityMatrix, Vocabulary};
pub use normalize::ScoreScale;
pub use types::{CoarsePhoneme, CoarsePhonemeScore, FineSymbol, TranslatedPhoneme};

use crate::config::ScoringConfig;

/// Result of one scoring pass, with a record of every local recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringOutcome {
    pub scores: Vec<CoarsePhonemeScore>,
    /// Fine symbols removed because the acoustic vocabulary lacks them
    pub dropped_symbols: Vec<FineSymbol>,
    /// Fine symbols that got the worst score because the matrix ran out of frames
    pub exhausted_symbols: usize,
    pub positional_fallback: bool,
}

impl ScoringOutcome {
    /// Whether any recovery path lowered the fidelity of this result.
    pub fn is_degraded(&self) -> bool {
        !self.dropped_symbols.is_empty() || self.exhausted_symbols > 0 || self.positional_fallback
    }
}

/// Runs resolve → align → normalize → aggregate with one configuration snapshot.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    aligner: Aligner,
    scale: ScoreScale,
    empty_cluster_score: f32,
}

impl ScoringEngine {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            aligner: Aligner::new(config.window_frames),
            scale: ScoreScale::from(config),
            empty_cluster_score: config.empty_cluster_score,
        }
    }

    pub fn score(
        &self,
        matrix: &ProbabilityMatrix,
        phonemes: Vec<TranslatedPhoneme>,
    ) -> ScoringOutcome {
        let resolved = alignment::resolve_symbols(phonemes, matrix.vocabulary());
        let raw = self.aligner.score(matrix, &resolved.columns);
        let exhausted_symbols = raw.iter().filter(|s| s.is_exhausted()).count();
        let normalized = self.scale.normalize_all(&raw);
        let aggregation =
            aggregate::aggregate(&resolved.phonemes, &normalized, self.empty_cluster_score);

        ScoringOutcome {
            scores: aggregation.scores,
            dropped_symbols: resolved.dropped,
            exhausted_symbols,
            positional_fallback: aggregation.positional_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::types::NormalizedScore;
    use std::sync::Arc;

    fn cat_vocabulary() -> Arc<Vocabulary> {
        Arc::new(Vocabulary::from_tokens([("<pad>", 0), ("k", 1), ("æ", 2), ("t", 3)]))
    }

    fn cat_phonemes() -> Vec<TranslatedPhoneme> {
        vec![
            TranslatedPhoneme::new("K".into(), vec!['k']),
            TranslatedPhoneme::new("AE1".into(), vec!['æ']),
            TranslatedPhoneme::new("T".into(), vec!['t']),
        ]
    }

    #[test]
    fn test_clean_pass_scores_high() {
        let rows = vec![
            vec![-9.0, -0.01, -9.0, -9.0],
            vec![-9.0, -9.0, -0.01, -9.0],
            vec![-9.0, -9.0, -9.0, -0.01],
        ];
        let matrix = ProbabilityMatrix::from_log_probs(rows, cat_vocabulary()).unwrap();
        let outcome = ScoringEngine::new(&ScoringConfig::default()).score(&matrix, cat_phonemes());

        assert!(!outcome.is_degraded());
        let values: Vec<f32> = outcome.scores.iter().map(|s| s.score.value()).collect();
        assert_eq!(values, vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_short_matrix_reports_exhaustion() {
        let rows = vec![vec![-9.0, -0.01, -9.0, -9.0]];
        let matrix = ProbabilityMatrix::from_log_probs(rows, cat_vocabulary()).unwrap();
        let outcome = ScoringEngine::new(&ScoringConfig::default()).score(&matrix, cat_phonemes());

        assert_eq!(outcome.exhausted_symbols, 2);
        assert!(outcome.is_degraded());
        assert_eq!(outcome.scores[2].score, NormalizedScore(1.0));
    }
}
