//! # Alignment & Scoring Engine
//!
//! Greedy monotonic windowed search over the probability matrix.
//!
//! ## Algorithm:
//! 1. Start a cursor at frame 0
//! 2. For each fine symbol in order, look at frames `[cursor, cursor + window)`
//! 3. Take the frame with the highest log-probability for that symbol's column
//!    (first one wins on ties) and record the value as the symbol's raw score
//! 4. Move the cursor to the frame after the winner
//! 5. Once the cursor has run off the end, every remaining symbol scores `-inf`
//!
//! This costs O(N·W) instead of the O(N·T) of a full forced alignment. It assumes
//! the phonemes appear in the audio in the same order as in the reference and that
//! none of them lasts longer than the window.
//!
//! ## Rust Concepts:
//! - **Owned cursor**: `AlignmentCursor` lives for exactly one pass and can only move forward
//! - **Slices**: the engine works on `&[usize]` column lists, never copying the matrix

use super::matrix::{ProbabilityMatrix, Vocabulary};
use super::types::{FineSymbol, RawScore, TranslatedPhoneme};
use tracing::{debug, warn};

/// Earliest frame not yet claimed by a previous symbol.
///
/// The only way to change the position is `claim`, which never moves backwards.
#[derive(Debug, Default)]
pub struct AlignmentCursor {
    frame: usize,
}

impl AlignmentCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.frame
    }

    fn claim(&mut self, frame: usize) {
        debug_assert!(frame >= self.frame);
        self.frame = frame + 1;
    }
}

/// Where one symbol landed in the matrix.
///
/// `frame` is `None` when the matrix was already exhausted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClaim {
    pub frame: Option<usize>,
    pub cursor_before: usize,
    pub score: RawScore,
}

/// Fine symbols resolved against the acoustic vocabulary.
///
/// Symbols the vocabulary does not know are removed from both the column list
/// and their phoneme's cluster, so `columns.len()` always equals the sum of
/// the cluster widths.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSymbols {
    pub phonemes: Vec<TranslatedPhoneme>,
    pub columns: Vec<usize>,
    pub dropped: Vec<FineSymbol>,
}

/// Look every fine symbol up in the vocabulary, dropping the unknown ones.
pub fn resolve_symbols(phonemes: Vec<TranslatedPhoneme>, vocabulary: &Vocabulary) -> ResolvedSymbols {
    let mut columns = Vec::new();
    let mut dropped = Vec::new();

    let phonemes = phonemes
        .into_iter()
        .map(|mut phoneme| {
            phoneme.cluster.retain(|&symbol| match vocabulary.column(symbol) {
                Some(column) => {
                    columns.push(column);
                    true
                }
                None => {
                    dropped.push(symbol);
                    false
                }
            });
            phoneme
        })
        .collect();

    if !dropped.is_empty() {
        warn!(
            dropped = ?dropped,
            "Phonetic symbols missing from the acoustic vocabulary will be ignored"
        );
    }

    ResolvedSymbols {
        phonemes,
        columns,
        dropped,
    }
}

/// The windowed search itself.
#[derive(Debug, Clone, Copy)]
pub struct Aligner {
    window: usize,
}

impl Aligner {
    /// A zero window would never claim a frame, so it is raised to one.
    pub fn new(window_frames: usize) -> Self {
        Self {
            window: window_frames.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// One raw score per column, in input order.
    pub fn score(&self, matrix: &ProbabilityMatrix, columns: &[usize]) -> Vec<RawScore> {
        self.trace(matrix, columns)
            .into_iter()
            .map(|claim| claim.score)
            .collect()
    }

    /// Like `score`, but reports the frame each symbol claimed.
    pub fn trace(&self, matrix: &ProbabilityMatrix, columns: &[usize]) -> Vec<FrameClaim> {
        let mut cursor = AlignmentCursor::new();
        let total_frames = matrix.frames();
        let mut claims = Vec::with_capacity(columns.len());

        for &column in columns {
            let cursor_before = cursor.position();
            if cursor_before >= total_frames {
                claims.push(FrameClaim {
                    frame: None,
                    cursor_before,
                    score: RawScore::WORST,
                });
                continue;
            }

            let search_end = (cursor_before + self.window).min(total_frames);
            let mut best_score = f32::NEG_INFINITY;
            let mut best_frame = cursor_before;
            for frame in cursor_before..search_end {
                let value = matrix.log_prob(frame, column);
                if value > best_score {
                    best_score = value;
                    best_frame = frame;
                }
            }

            cursor.claim(best_frame);
            claims.push(FrameClaim {
                frame: Some(best_frame),
                cursor_before,
                score: RawScore(best_score),
            });
        }

        let exhausted = claims.iter().filter(|c| c.frame.is_none()).count();
        if exhausted > 0 {
            debug!(
                exhausted,
                frames = total_frames,
                "Alignment ran out of frames before all symbols were placed"
            );
        }

        claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn vocab(size: usize) -> Arc<Vocabulary> {
        Arc::new(Vocabulary::from_tokens(
            (0..size).map(|i| (char::from(b'a' + i as u8).to_string(), i)),
        ))
    }

    fn matrix(rows: Vec<Vec<f32>>) -> ProbabilityMatrix {
        let width = rows[0].len();
        ProbabilityMatrix::from_log_probs(rows, vocab(width)).unwrap()
    }

    #[test]
    fn test_claims_best_frame_in_order() {
        let m = matrix(vec![
            vec![-0.1, -5.0, -5.0],
            vec![-5.0, -0.2, -5.0],
            vec![-5.0, -5.0, -0.3],
        ]);
        let claims = Aligner::new(150).trace(&m, &[0, 1, 2]);
        let frames: Vec<_> = claims.iter().map(|c| c.frame).collect();
        assert_eq!(frames, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(claims[1].score, RawScore(-0.2));
    }

    #[test]
    fn test_first_maximum_wins_ties() {
        let m = matrix(vec![vec![-1.0, -2.0], vec![-1.0, -2.0], vec![-1.0, -2.0]]);
        let claims = Aligner::new(150).trace(&m, &[0]);
        assert_eq!(claims[0].frame, Some(0));
    }

    #[test]
    fn test_window_limits_search() {
        let m = matrix(vec![
            vec![-9.0, -1.0],
            vec![-8.0, -1.0],
            vec![-0.5, -1.0],
        ]);
        // The strong frame sits outside a two-frame window.
        let scores = Aligner::new(2).score(&m, &[0]);
        assert_eq!(scores, vec![RawScore(-8.0)]);
    }

    #[test]
    fn test_exhaustion_scores_worst_without_advancing() {
        let m = matrix(vec![vec![-0.1, -3.0], vec![-3.0, -0.1]]);
        let claims = Aligner::new(150).trace(&m, &[0, 1, 0, 1]);
        assert_eq!(claims[2].frame, None);
        assert!(claims[2].score.is_exhausted());
        assert_eq!(claims[3].cursor_before, claims[2].cursor_before);
        assert!(claims[3].score.is_exhausted());
    }

    #[test]
    fn test_empty_matrix_exhausts_everything() {
        let m = ProbabilityMatrix::from_log_probs(vec![], vocab(2)).unwrap();
        let scores = Aligner::new(150).score(&m, &[0, 1]);
        assert!(scores.iter().all(RawScore::is_exhausted));
    }

    #[test]
    fn test_zero_window_is_raised() {
        assert_eq!(Aligner::new(0).window(), 1);
    }

    #[test]
    fn test_resolve_drops_unknown_symbols() {
        let vocabulary = Vocabulary::from_tokens([("k", 0), ("t", 1)]);
        let phonemes = vec![
            TranslatedPhoneme::new("K".into(), vec!['k']),
            TranslatedPhoneme::new("AE1".into(), vec!['æ']),
            TranslatedPhoneme::new("CH".into(), vec!['t', 'ʃ']),
        ];
        let resolved = resolve_symbols(phonemes, &vocabulary);
        assert_eq!(resolved.columns, vec![0, 1]);
        assert_eq!(resolved.dropped, vec!['æ', 'ʃ']);
        assert!(resolved.phonemes[1].fully_dropped());
        assert_eq!(resolved.phonemes[2].cluster, vec!['t']);
        assert_eq!(resolved.phonemes[2].translated_width, 2);
    }

    fn matrix_strategy() -> impl Strategy<Value = ProbabilityMatrix> {
        (1usize..6, 0usize..40).prop_flat_map(|(width, frames)| {
            prop::collection::vec(prop::collection::vec(-20.0f32..0.0, width), frames).prop_map(
                move |rows| ProbabilityMatrix::from_log_probs(rows, vocab(width)).unwrap(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_cursor_never_moves_backwards(
            m in matrix_strategy(),
            picks in prop::collection::vec(0usize..100, 1..30),
            window in 1usize..10,
        ) {
            let columns: Vec<usize> = picks.iter().map(|p| p % m.columns()).collect();
            let claims = Aligner::new(window).trace(&m, &columns);
            prop_assert_eq!(claims.len(), columns.len());

            let mut last_cursor = 0;
            let mut last_frame: Option<usize> = None;
            for claim in &claims {
                prop_assert!(claim.cursor_before >= last_cursor);
                last_cursor = claim.cursor_before;
                if let Some(frame) = claim.frame {
                    prop_assert!(frame >= claim.cursor_before);
                    prop_assert!(frame < claim.cursor_before + window);
                    if let Some(previous) = last_frame {
                        prop_assert!(frame > previous);
                    }
                    last_frame = Some(frame);
                }
            }
        }
    }
}
