//! # Transcription Engine
//!
//! The speech-recognizer seam the assessment pipeline talks to, and the
//! Whisper-backed implementation of it.
//!
//! ## Thread Safety:
//! Whisper's decoder mutates its attention cache, so the model sits behind a
//! `Mutex` and recognitions run one at a time. The pipeline calls this from a
//! blocking thread, never from the async executor.

use crate::audio::DecodedAudio;
use crate::transcription::model::{WhisperModel, WhisperVariant};
use anyhow::{bail, Result};
use candle_core::Device;
use std::sync::{Mutex, PoisonError};

/// Audio → what the speaker said, as plain text.
pub trait SpeechRecognizer: Send + Sync {
    fn transcribe(&self, audio: &DecodedAudio) -> Result<String>;
}

/// Whisper recognizer shared by every request.
pub struct WhisperRecognizer {
    model: Mutex<WhisperModel>,
}

impl WhisperRecognizer {
    /// Download and load the configured Whisper checkpoint.
    ///
    /// ## Parameters:
    /// - **model_name**: the `models.whisper_model` setting, e.g. `"base.en"`
    /// - **device**: Device for model inference (CPU/GPU)
    pub async fn load(model_name: &str, device: Device) -> Result<Self> {
        let variant: WhisperVariant = model_name.parse()?;
        let model = WhisperModel::load(variant, device).await?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl SpeechRecognizer for WhisperRecognizer {
    fn transcribe(&self, audio: &DecodedAudio) -> Result<String> {
        if audio.sample_rate != candle_transformers::models::whisper::SAMPLE_RATE as u32 {
            bail!("Whisper expects 16kHz audio, got {}Hz", audio.sample_rate);
        }
        // A panic mid-decode leaves nothing half-written that the next call relies on.
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("Transcribing with Whisper {}", model.variant());
        model.transcribe(&audio.samples)
    }
}
