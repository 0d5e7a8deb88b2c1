//! # Word Mapper
//!
//! Splits the sentence-level phoneme scores back into words and attaches a
//! tip to every phoneme scored below the threshold.
//!
//! ## Partitioning:
//! Each whitespace-separated word of the reference is transcribed on its own.
//! A sentence transcribes to the concatenation of its words, so the scores are
//! that concatenation minus whatever the scoring engine left out. Each word
//! claims, in order, the scores whose phoneme matches its own transcription;
//! a phoneme that was left out is skipped and the next word still gets its own
//! sounds.
//!
//! When the scores are not an ordered subsequence of the words' phonemes (a
//! positional fallback upstream paired them differently), each word instead
//! takes as many scores as it has phonemes, with the cursor clamped so words
//! past the end get fewer (possibly zero) phonemes. Both cases log a warning.
//!
//! ## Tips:
//! Tip requests for different phonemes are independent, so they run
//! concurrently (bounded by `max_concurrent_tips`). `buffered` yields results
//! in request order, which keeps the output order fixed.

use crate::feedback::{Tip, TipGenerator};
use crate::phonetics::PhoneticTranscriber;
use crate::scoring::{CoarsePhoneme, CoarsePhonemeScore};
use futures_util::stream::{self, StreamExt};
use std::ops::Range;
use tracing::{debug, warn};

use super::schema::{PhonemeScore, WordAnalysis};

/// Per-request knobs of the mapper.
#[derive(Debug, Clone, Copy)]
pub struct MapperSettings {
    pub tip_threshold: f32,
    pub max_concurrent_tips: usize,
}

/// Mapped words plus what it took to build them.
#[derive(Debug, Clone, PartialEq)]
pub struct WordMapping {
    pub words: Vec<WordAnalysis>,
    pub tips_requested: usize,
    pub tip_fallbacks: usize,
    /// Per-word phoneme counts did not add up to the number of scores
    pub count_mismatch: bool,
}

struct TipRequest {
    word_index: usize,
    phoneme_index: usize,
}

/// Group `scores` by the words of `reference_text` and attach tips.
pub async fn map_to_words(
    reference_text: &str,
    scores: &[CoarsePhonemeScore],
    transcriber: &dyn PhoneticTranscriber,
    tips: &dyn TipGenerator,
    settings: MapperSettings,
) -> WordMapping {
    let (mut words, expected) = partition(reference_text, scores, transcriber);
    let count_mismatch = expected != scores.len();
    if count_mismatch {
        warn!(
            scored = scores.len(),
            expected,
            "Word phoneme counts do not match the scored phonemes"
        );
    }

    let requests: Vec<TipRequest> = words
        .iter()
        .enumerate()
        .flat_map(|(word_index, word)| {
            word.phonemes
                .iter()
                .enumerate()
                .filter(|(_, phoneme)| phoneme.score < settings.tip_threshold)
                .map(move |(phoneme_index, _)| TipRequest {
                    word_index,
                    phoneme_index,
                })
        })
        .collect();

    let generated: Vec<Tip> = {
        let words = &words;
        stream::iter(requests.iter())
            .map(|request| {
                let word = &words[request.word_index];
                let phoneme = &word.phonemes[request.phoneme_index];
                debug!(
                    phoneme = %phoneme.phoneme,
                    score = phoneme.score,
                    word = %word.word,
                    "Low score, requesting tip"
                );
                tips.tip(&phoneme.phoneme, &word.word, reference_text)
            })
            .buffered(settings.max_concurrent_tips.max(1))
            .collect()
            .await
    };

    let tip_fallbacks = generated.iter().filter(|tip| tip.fallback).count();
    for (request, tip) in requests.iter().zip(generated) {
        words[request.word_index].phonemes[request.phoneme_index].feedback_tip = Some(tip.text);
    }

    WordMapping {
        words,
        tips_requested: requests.len(),
        tip_fallbacks,
        count_mismatch,
    }
}

/// One `WordAnalysis` per whitespace-separated word, without tips.
/// Returns the words and how many phonemes their transcriptions hold in total.
fn partition(
    reference_text: &str,
    scores: &[CoarsePhonemeScore],
    transcriber: &dyn PhoneticTranscriber,
) -> (Vec<WordAnalysis>, usize) {
    let transcribed: Vec<(&str, Vec<CoarsePhoneme>)> = reference_text
        .split_whitespace()
        .map(|word| (word, transcriber.transcribe(word)))
        .collect();
    let expected = transcribed.iter().map(|(_, phonemes)| phonemes.len()).sum();

    let spans = spans_by_phoneme(&transcribed, scores).unwrap_or_else(|| {
        warn!("Scored phonemes are out of step with the reference words, pairing by count");
        spans_by_count(&transcribed, scores.len())
    });

    let words = transcribed
        .iter()
        .zip(spans)
        .map(|((word, _), span)| WordAnalysis {
            word: word.to_string(),
            phonemes: scores[span]
                .iter()
                .map(|scored| PhonemeScore {
                    phoneme: scored.phoneme.to_string(),
                    score: scored.score.value(),
                    feedback_tip: None,
                })
                .collect(),
        })
        .collect();
    (words, expected)
}

/// Walk the words' phonemes in order, letting each claim the next score when
/// it names the same phoneme. `None` unless every score was claimed.
fn spans_by_phoneme(
    transcribed: &[(&str, Vec<CoarsePhoneme>)],
    scores: &[CoarsePhonemeScore],
) -> Option<Vec<Range<usize>>> {
    let mut cursor = 0;
    let spans: Vec<Range<usize>> = transcribed
        .iter()
        .map(|(_, phonemes)| {
            let start = cursor;
            for phoneme in phonemes {
                if scores.get(cursor).is_some_and(|scored| &scored.phoneme == phoneme) {
                    cursor += 1;
                }
            }
            start..cursor
        })
        .collect();
    (cursor == scores.len()).then_some(spans)
}

/// Each word takes as many scores as it has phonemes, clamped to the end.
fn spans_by_count(transcribed: &[(&str, Vec<CoarsePhoneme>)], available: usize) -> Vec<Range<usize>> {
    let mut cursor = 0;
    transcribed
        .iter()
        .map(|(_, phonemes)| {
            let start = cursor.min(available);
            cursor += phonemes.len();
            start..cursor.min(available)
        })
        .collect()
}
