//! # Probability Matrix
//!
//! The frame-synchronous output of the acoustic model: one row per time frame,
//! one column per vocabulary entry, every value a log-probability.
//! Built once per request and only read afterwards.

use super::types::FineSymbol;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Lookup from a fine symbol to its column in the probability matrix.
///
/// Only single-character tokens can ever match a fine symbol. Multi-character
/// tokens (`<pad>`, `<unk>`, word delimiters) still occupy a column, so they
/// count towards `len()` but are not addressable by symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    columns: HashMap<FineSymbol, usize>,
    len: usize,
}

impl Vocabulary {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: AsRef<str>,
    {
        let mut columns = HashMap::new();
        let mut len = 0;
        for (token, index) in tokens {
            len = len.max(index + 1);
            let mut chars = token.as_ref().chars();
            if let (Some(symbol), None) = (chars.next(), chars.next()) {
                columns.insert(symbol, index);
            }
        }
        Self { columns, len }
    }

    /// Parse a HuggingFace `vocab.json` (`{"token": id, ...}`).
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        let tokens: HashMap<String, usize> = serde_json::from_str(json)?;
        Ok(Self::from_tokens(tokens))
    }

    pub fn column(&self, symbol: FineSymbol) -> Option<usize> {
        self.columns.get(&symbol).copied()
    }

    pub fn contains(&self, symbol: FineSymbol) -> bool {
        self.columns.contains_key(&symbol)
    }

    /// Number of columns the vocabulary spans.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MatrixError {
    #[error("frame {frame} has {found} columns, expected {expected}")]
    RaggedRow {
        frame: usize,
        expected: usize,
        found: usize,
    },

    #[error("matrix has {columns} columns but the vocabulary spans {vocabulary}")]
    VocabularyTooWide { columns: usize, vocabulary: usize },
}

/// Row-major log-probability matrix over the acoustic vocabulary.
#[derive(Debug, Clone)]
pub struct ProbabilityMatrix {
    frames: usize,
    columns: usize,
    data: Vec<f32>,
    vocabulary: Arc<Vocabulary>,
}

impl ProbabilityMatrix {
    /// Build a matrix from rows that are already in the log domain.
    pub fn from_log_probs(
        rows: Vec<Vec<f32>>,
        vocabulary: Arc<Vocabulary>,
    ) -> Result<Self, MatrixError> {
        let columns = rows.first().map(Vec::len).unwrap_or(vocabulary.len());
        if vocabulary.len() > columns && !rows.is_empty() {
            return Err(MatrixError::VocabularyTooWide {
                columns,
                vocabulary: vocabulary.len(),
            });
        }

        let frames = rows.len();
        let mut data = Vec::with_capacity(frames * columns);
        for (frame, row) in rows.into_iter().enumerate() {
            if row.len() != columns {
                return Err(MatrixError::RaggedRow {
                    frame,
                    expected: columns,
                    found: row.len(),
                });
            }
            data.extend(row);
        }

        Ok(Self {
            frames,
            columns,
            data,
            vocabulary,
        })
    }

    /// Build a matrix from raw logits, applying a log-softmax to every row.
    pub fn from_logits(
        rows: Vec<Vec<f32>>,
        vocabulary: Arc<Vocabulary>,
    ) -> Result<Self, MatrixError> {
        let rows = rows.into_iter().map(|row| log_softmax(&row)).collect();
        Self::from_log_probs(rows, vocabulary)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Log-probability of `column` at `frame`.
    ///
    /// Callers stay inside `frames()` x `columns()`; the alignment engine only
    /// asks for columns it resolved through the vocabulary.
    pub fn log_prob(&self, frame: usize, column: usize) -> f32 {
        self.data[frame * self.columns + column]
    }
}

/// Numerically stable log-softmax of one row.
pub fn log_softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return row.to_vec();
    }
    let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
    row.iter().map(|v| v - log_sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Arc<Vocabulary> {
        Arc::new(Vocabulary::from_tokens([
            ("<pad>", 0),
            ("k", 1),
            ("æ", 2),
            ("t", 3),
        ]))
    }

    #[test]
    fn test_vocabulary_single_char_tokens() {
        let vocab = vocab();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.column('æ'), Some(2));
        assert_eq!(vocab.column('ʃ'), None);
        assert!(!vocab.contains('<'));
    }

    #[test]
    fn test_vocabulary_from_json() {
        let vocab = Vocabulary::from_json_str(r#"{"<pad>": 0, "|": 1, "ɹ": 2}"#).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.column('ɹ'), Some(2));
        assert_eq!(vocab.column('|'), Some(1));
    }

    #[test]
    fn test_log_softmax_rows_sum_to_one() {
        let matrix =
            ProbabilityMatrix::from_logits(vec![vec![1.0, 2.0, 3.0, 4.0]; 2], vocab()).unwrap();
        for frame in 0..matrix.frames() {
            let total: f32 = (0..matrix.columns())
                .map(|c| matrix.log_prob(frame, c).exp())
                .sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert!(matrix.log_prob(0, 3) > matrix.log_prob(0, 0));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = ProbabilityMatrix::from_log_probs(
            vec![vec![0.0; 4], vec![0.0; 3]],
            vocab(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MatrixError::RaggedRow {
                frame: 1,
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn test_vocabulary_wider_than_matrix_rejected() {
        let err = ProbabilityMatrix::from_log_probs(vec![vec![0.0; 2]], vocab()).unwrap_err();
        assert!(matches!(err, MatrixError::VocabularyTooWide { .. }));
    }

    #[test]
    fn test_empty_matrix_is_allowed() {
        let matrix = ProbabilityMatrix::from_log_probs(vec![], vocab()).unwrap();
        assert_eq!(matrix.frames(), 0);
    }
}
