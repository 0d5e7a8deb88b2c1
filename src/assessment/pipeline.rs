//! # Assessment Pipeline
//!
//! The request-level orchestration: decode, check the transcript, score,
//! map to words, coach.
//!
//! ## Flow:
//! ```text
//! audio bytes ─decode─▶ PCM ─recognize─▶ transcript ── mismatch ──▶ is_correct: false
//!                        │                   │
//!                        │                 match
//!                        ▼                   ▼
//!                  acoustic scorer    transcribe reference → translate
//!                        └──────▶ scoring engine ◀──────┘
//!                                      │
//!                                 word mapper + tips ──▶ AssessorResponse
//! ```
//!
//! ## Shared Resources:
//! The collaborators are created once at startup and injected here. Model
//! inference runs on blocking threads behind a semaphore so a burst of
//! uploads cannot oversubscribe memory; tip generation happens after the
//! permit is released.

use crate::acoustic::AcousticScorer;
use crate::audio::{AudioDecoder, DecodedAudio};
use crate::config::ScoringConfig;
use crate::error::{AppError, AppResult};
use crate::feedback::TipGenerator;
use crate::phonetics::{translate_sequence, PhoneticTranscriber};
use crate::scoring::{ProbabilityMatrix, ScoringEngine};
use crate::transcription::SpeechRecognizer;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};

use super::schema::AssessorResponse;
use super::word_mapper::{map_to_words, MapperSettings};

/// Everything the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub decoder: Arc<dyn AudioDecoder>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub acoustic: Arc<dyn AcousticScorer>,
    pub transcriber: Arc<dyn PhoneticTranscriber>,
    pub tips: Arc<dyn TipGenerator>,
}

/// Configuration snapshot taken when a request starts.
#[derive(Debug, Clone)]
pub struct AssessmentSettings {
    pub scoring: ScoringConfig,
    pub max_concurrent_tips: usize,
}

/// What happened along the way, for metrics and logs. Never sent to the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssessmentReport {
    pub dropped_symbols: usize,
    pub exhausted_symbols: usize,
    pub positional_fallback: bool,
    pub word_count_mismatch: bool,
    pub tips_requested: usize,
    pub tip_fallbacks: usize,
}

impl AssessmentReport {
    pub fn is_degraded(&self) -> bool {
        self.dropped_symbols > 0
            || self.exhausted_symbols > 0
            || self.positional_fallback
            || self.word_count_mismatch
    }
}

#[derive(Debug, Clone)]
pub struct AssessmentOutcome {
    pub response: AssessorResponse,
    pub report: AssessmentReport,
}

pub struct Assessor {
    collaborators: Collaborators,
    inference_permits: Semaphore,
}

impl Assessor {
    pub fn new(collaborators: Collaborators, max_concurrent_assessments: usize) -> Self {
        Self {
            collaborators,
            inference_permits: Semaphore::new(max_concurrent_assessments.max(1)),
        }
    }

    /// Assess one recording of `reference_text`.
    ///
    /// Only decode failures and model failures are errors. Everything the
    /// scoring engine and word mapper recover from shows up in the report.
    pub async fn assess(
        &self,
        reference_text: &str,
        audio_bytes: &[u8],
        settings: &AssessmentSettings,
    ) -> AppResult<AssessmentOutcome> {
        let span = info_span!("assessment", assessment_id = %uuid::Uuid::new_v4());
        self.run(reference_text, audio_bytes, settings)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        reference_text: &str,
        audio_bytes: &[u8],
        settings: &AssessmentSettings,
    ) -> AppResult<AssessmentOutcome> {
        let start_time = Instant::now();
        if reference_text.trim().is_empty() {
            return Err(AppError::BadRequest("reference_text must not be empty".to_string()));
        }

        let audio = Arc::new(self.collaborators.decoder.decode(audio_bytes).await?);
        info!(
            "Decoded {} bytes into {:.2}s of audio",
            audio_bytes.len(),
            audio.duration_seconds()
        );

        let permit = self
            .inference_permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("inference pool is closed".to_string()))?;

        let recognizer = Arc::clone(&self.collaborators.recognizer);
        let transcript = run_blocking(Arc::clone(&audio), move |audio| recognizer.transcribe(audio)).await?;

        let is_correct = normalize_text(reference_text) == normalize_text(&transcript);
        info!(is_correct, transcript = %transcript, "Transcript checked");
        if !is_correct {
            return Ok(AssessmentOutcome {
                response: AssessorResponse {
                    is_correct,
                    user_transcript: transcript,
                    words: Vec::new(),
                },
                report: AssessmentReport::default(),
            });
        }

        let acoustic = Arc::clone(&self.collaborators.acoustic);
        let matrix: ProbabilityMatrix = run_blocking(audio, move |audio| acoustic.score(audio)).await?;
        drop(permit);

        let transcriber = self.collaborators.transcriber.as_ref();
        let phonemes = transcriber.transcribe(reference_text);
        let outcome = ScoringEngine::new(&settings.scoring).score(&matrix, translate_sequence(&phonemes));
        if outcome.is_degraded() {
            warn!(
                dropped = outcome.dropped_symbols.len(),
                exhausted = outcome.exhausted_symbols,
                positional = outcome.positional_fallback,
                "Scoring recovered from degraded input"
            );
        }

        let mapping = map_to_words(
            reference_text,
            &outcome.scores,
            transcriber,
            self.collaborators.tips.as_ref(),
            MapperSettings {
                tip_threshold: settings.scoring.tip_threshold,
                max_concurrent_tips: settings.max_concurrent_tips,
            },
        )
        .await;

        let report = AssessmentReport {
            dropped_symbols: outcome.dropped_symbols.len(),
            exhausted_symbols: outcome.exhausted_symbols,
            positional_fallback: outcome.positional_fallback,
            word_count_mismatch: mapping.count_mismatch,
            tips_requested: mapping.tips_requested,
            tip_fallbacks: mapping.tip_fallbacks,
        };
        info!(
            phonemes = outcome.scores.len(),
            frames = matrix.frames(),
            tips = report.tips_requested,
            degraded = report.is_degraded(),
            "Assessment finished in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(AssessmentOutcome {
            response: AssessorResponse {
                is_correct,
                user_transcript: transcript,
                words: mapping.words,
            },
            report,
        })
    }
}

/// Run a model call on tokio's blocking pool.
async fn run_blocking<T, F>(audio: Arc<DecodedAudio>, call: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&DecodedAudio) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&audio))
        .await
        .map_err(|e| AppError::Internal(format!("inference task failed: {}", e)))?
        .map_err(AppError::from)
}

/// Lower-case, drop punctuation other than apostrophes, collapse whitespace.
///
/// Two sentences count as the same utterance when their normalized forms are equal.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation() || *c == '\'')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
