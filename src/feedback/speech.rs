//! # Speech Synthesis
//!
//! Reads a sentence aloud so the learner can hear the target pronunciation
//! before recording. Backed by an OpenAI-compatible `/audio/speech` endpoint.

use crate::config::FeedbackConfig;
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech service answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Text → encoded audio (MP3).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SynthesisError>;
}

pub struct OpenAiSpeechClient {
    client: reqwest::Client,
    settings: FeedbackConfig,
    api_key: Option<String>,
}

impl OpenAiSpeechClient {
    pub fn new(settings: FeedbackConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            api_key,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SynthesisError> {
        let voice = voice.unwrap_or(&self.settings.tts_voice);
        let url = format!("{}/audio/speech", self.settings.api_base.trim_end_matches('/'));

        let mut request = self.client.post(url).json(&json!({
            "model": self.settings.tts_model,
            "voice": voice,
            "input": text,
            "response_format": "mp3",
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status { status, body });
        }

        let audio = response.bytes().await?;
        debug!(voice, bytes = audio.len(), "Synthesized speech");
        Ok(audio.to_vec())
    }
}
