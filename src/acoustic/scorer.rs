//! # Acoustic Scorer
//!
//! Runs the phoneme recognizer over a recording and hands the scoring engine
//! its per-frame log-probabilities.

use super::model::{log_probs, normalize_samples, Wav2Vec2Config, Wav2Vec2ForCtc};
use crate::audio::DecodedAudio;
use crate::config::ModelsConfig;
use crate::hub;
use crate::scoring::{ProbabilityMatrix, Vocabulary};
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The sample rate wav2vec2 checkpoints are trained on.
pub const ACOUSTIC_SAMPLE_RATE: u32 = 16_000;

/// Audio → probability matrix over the model's phonetic vocabulary.
///
/// Called from a blocking thread; implementations may take seconds.
pub trait AcousticScorer: Send + Sync {
    fn score(&self, audio: &DecodedAudio) -> Result<ProbabilityMatrix>;
}

/// wav2vec2 CTC phoneme recognizer.
///
/// The forward pass only borrows the model, so concurrent requests share one
/// instance without a lock.
pub struct Wav2Vec2Scorer {
    model: Wav2Vec2ForCtc,
    vocabulary: Arc<Vocabulary>,
    device: Device,
    /// Shorter input leaves the conv stack with no frames at all.
    min_samples: usize,
}

impl Wav2Vec2Scorer {
    /// Download `config.json`, `vocab.json` and the weights, then build the model.
    pub async fn load(models: &ModelsConfig, device: Device) -> Result<Self> {
        let repo_name = models.acoustic_model.as_str();
        info!("Loading acoustic model {}...", repo_name);
        let start_time = Instant::now();

        let api = hub::api()?;
        let repo = api.model(repo_name.to_string());
        let config_path = hub::fetch(&repo, repo_name, "config.json").await?;
        let vocab_path = hub::fetch(&repo, repo_name, "vocab.json").await?;
        let weights_path = hub::fetch_weights(&repo, repo_name, &models.acoustic_weights).await?;

        let config: Wav2Vec2Config = serde_json::from_reader(std::fs::File::open(&config_path)?)
            .with_context(|| format!("Invalid wav2vec2 config in {}", repo_name))?;
        debug!("Acoustic model config: {:?}", config);

        let vocabulary = Vocabulary::from_json_str(&std::fs::read_to_string(&vocab_path)?)
            .with_context(|| format!("Invalid vocab.json in {}", repo_name))?;
        if vocabulary.is_empty() {
            bail!("vocab.json in {} has no tokens", repo_name);
        }

        let vb = hub::var_builder(&weights_path, DType::F32, &device)?;
        let model = Wav2Vec2ForCtc::load(&config, vb)
            .map_err(|e| anyhow!("Failed to build wav2vec2 from {}: {}", repo_name, e))?;

        info!(
            vocabulary = vocabulary.len(),
            layers = config.num_hidden_layers,
            "Acoustic model loaded in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            vocabulary: Arc::new(vocabulary),
            device,
            min_samples: config.receptive_field(),
        })
    }
}

impl AcousticScorer for Wav2Vec2Scorer {
    fn score(&self, audio: &DecodedAudio) -> Result<ProbabilityMatrix> {
        if audio.sample_rate != ACOUSTIC_SAMPLE_RATE {
            bail!(
                "acoustic model expects {}Hz audio, got {}Hz",
                ACOUSTIC_SAMPLE_RATE,
                audio.sample_rate
            );
        }
        let start_time = Instant::now();

        let mut samples = normalize_samples(&audio.samples);
        if samples.len() < self.min_samples {
            samples.resize(self.min_samples, 0.0);
        }
        let len = samples.len();

        let input = Tensor::from_vec(samples, (1, len), &self.device)?;
        let logits = self.model.forward(&input)?.squeeze(0)?;
        let rows = log_probs(&logits)?;

        let matrix = ProbabilityMatrix::from_log_probs(rows, Arc::clone(&self.vocabulary))?;
        debug!(
            frames = matrix.frames(),
            columns = matrix.columns(),
            "Scored {:.2}s of audio in {:.2}s",
            audio.duration_seconds(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(matrix)
    }
}
