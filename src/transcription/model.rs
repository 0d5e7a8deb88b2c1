//! # Whisper Model Management
//!
//! Loads a Whisper checkpoint with Candle-rs and runs greedy decoding over one
//! recording. Used only to check that the learner said the reference sentence,
//! so there is no timestamping, beam search or temperature fallback.
//!
//! ## Model Loading Process:
//! 1. Download config, tokenizer and weights from HuggingFace (cached locally)
//! 2. Build the Slaney mel filterbank for the model's number of mel bins
//! 3. Initialize the model on the selected device
//! 4. Warm up with one second of silence
//!
//! ## Decoding:
//! ```text
//! prompt: <|startoftranscript|> [<|en|>] <|transcribe|> <|notimestamps|>
//! loop:   decoder → final_linear on the last position → suppress → argmax
//! stop:   <|endoftext|>, the token limit, or a repetition loop
//! ```

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// A model size plus whether the English-only checkpoint is wanted.
///
/// Parsed from the `models.whisper_model` setting: `"base"`, `"base.en"`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhisperVariant {
    pub size: ModelSize,
    pub english_only: bool,
}

impl WhisperVariant {
    /// HuggingFace repository holding this checkpoint.
    pub fn repo_name(&self) -> String {
        match (self.size, self.english_only) {
            // There is no English-only large model.
            (ModelSize::Large, _) => "openai/whisper-large-v2".to_string(),
            (size, true) => format!("openai/whisper-{}.en", size),
            (size, false) => format!("openai/whisper-{}", size),
        }
    }

    /// English-only checkpoints have no language tokens in their prompt.
    pub fn is_multilingual(&self) -> bool {
        !self.english_only || self.size == ModelSize::Large
    }
}

impl std::str::FromStr for WhisperVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let (name, english_only) = match lowered.strip_suffix(".en") {
            Some(name) => (name, true),
            None => (lowered.as_str(), false),
        };
        let size = match name {
            "tiny" => ModelSize::Tiny,
            "base" => ModelSize::Base,
            "small" => ModelSize::Small,
            "medium" => ModelSize::Medium,
            "large" => ModelSize::Large,
            _ => return Err(anyhow!("Unknown Whisper model: {}", s)),
        };
        Ok(Self { size, english_only })
    }
}

impl std::fmt::Display for WhisperVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.english_only {
            write!(f, "{}.en", self.size)
        } else {
            write!(f, "{}", self.size)
        }
    }
}

/// Token ids of the decoding prompt, looked up in the checkpoint's tokenizer.
#[derive(Debug, Clone)]
struct SpecialTokens {
    sot: u32,
    transcribe: u32,
    no_timestamps: u32,
    eot: u32,
    language: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer, multilingual: bool) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };
        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
            language: if multilingual { Some(id("<|en|>")?) } else { None },
        })
    }

    fn prompt(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot];
        tokens.extend(self.language);
        tokens.push(self.transcribe);
        tokens.push(self.no_timestamps);
        tokens
    }
}

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// The decoder keeps a cross-attention cache, so `transcribe` needs `&mut self`.
/// The recognizer wrapping this struct serializes access with a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    variant: WhisperVariant,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    mel_filters: Vec<f32>,
    /// Additive logit mask: `-inf` for tokens the decoder must never emit
    suppress_mask: Tensor,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace.
    pub async fn load(variant: WhisperVariant, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", variant);
        let start_time = Instant::now();

        let repo_name = variant.repo_name();
        let api = crate::hub::api()?;
        let repo = api.model(repo_name.clone());

        let config_filename = crate::hub::fetch(&repo, &repo_name, "config.json").await?;
        let tokenizer_filename = crate::hub::fetch(&repo, &repo_name, "tokenizer.json").await?;
        let weights_filename =
            crate::hub::fetch_weights(&repo, &repo_name, "model.safetensors").await?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        tracing::debug!("Whisper config: {:?}", config);

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::resolve(&tokenizer, variant.is_multilingual())?;

        let mel_filters = mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);
        let suppress_mask = suppress_mask(&config, tokens.no_timestamps, &device)?;

        let vb = crate::hub::var_builder(&weights_filename, m::DTYPE, &device)?;
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            variant,
            start_time.elapsed().as_secs_f64()
        );

        let mut whisper_model = Self {
            model,
            config,
            device,
            variant,
            tokenizer,
            tokens,
            mel_filters,
            suppress_mask,
        };

        whisper_model.validate()?;
        Ok(whisper_model)
    }

    pub fn variant(&self) -> WhisperVariant {
        self.variant
    }

    /// Log-mel spectrogram of (at most) the first 30 seconds, shaped (1, mels, frames).
    fn pcm_to_mel(&self, pcm_data: &[f32]) -> Result<Tensor> {
        let n_mels = self.config.num_mel_bins;
        let mel = audio::pcm_to_mel(&self.config, pcm_data, &self.mel_filters);
        let frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?;
        Ok(mel.narrow(2, 0, frames.min(m::N_FRAMES))?)
    }

    /// Transcribe 16kHz mono audio to text.
    pub fn transcribe(&mut self, audio_data: &[f32]) -> Result<String> {
        let start_time = Instant::now();
        if audio_data.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }
        if audio_data.len() > m::N_SAMPLES {
            tracing::warn!("Audio is longer than 30 seconds, only the first 30 are transcribed");
        }

        let mel = self.pcm_to_mel(audio_data)?;
        let audio_features = self.model.encoder.forward(&mel, true)?;

        let mut tokens = self.tokens.prompt();
        let prompt_len = tokens.len();
        let max_tokens = self.config.max_target_positions / 2;

        for i in 0..max_tokens {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_mask)?;
            let next_token = logits.argmax(0)?.to_scalar::<u32>()?;

            if next_token == self.tokens.eot {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next_token) {
                tracing::debug!("Stopping decode on a repetition loop");
                break;
            }
            tokens.push(next_token);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?
            .trim()
            .to_string();

        tracing::debug!(
            "Transcribed {:.2}s of audio in {:.2}s: '{}'",
            audio_data.len() as f64 / m::SAMPLE_RATE as f64,
            start_time.elapsed().as_secs_f64(),
            text
        );
        Ok(text)
    }

    /// Run one second of silence through the model so load failures surface at startup.
    fn validate(&mut self) -> Result<()> {
        let result = self.transcribe(&vec![0.0f32; m::SAMPLE_RATE])?;
        tracing::debug!("Model validation successful, test result: '{}'", result);
        Ok(())
    }
}

fn suppress_mask(config: &Config, no_timestamps: u32, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|token| {
            // Timestamp tokens follow <|notimestamps|> in every Whisper vocabulary.
            if config.suppress_tokens.contains(&token) || token > no_timestamps {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), device)?)
}

/// True when emitting `next` would extend a loop: the same token four times,
/// or the last three tokens repeating the three before them.
fn is_repetitive(output: &[u32], next: u32) -> bool {
    let n = output.len();
    if n >= 3 && output[n - 3..].iter().all(|&t| t == next) {
        return true;
    }
    if n >= 5 {
        let mut recent = output[n - 2..].to_vec();
        recent.push(next);
        return recent == output[n - 5..n - 2];
    }
    false
}

fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;
    if hz < MIN_LOG_HZ {
        hz / F_SP
    } else {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / log_step
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;
    if mel < min_log_mel {
        mel * F_SP
    } else {
        MIN_LOG_HZ * (log_step * (mel - min_log_mel)).exp()
    }
}

/// Slaney-normalized triangular mel filters, row-major `n_mels x (n_fft / 2 + 1)`.
///
/// The same filterbank Whisper was trained with (librosa's default `mel`).
pub fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * nyquist / (n_freqs - 1) as f64)
        .collect();

    let max_mel = hz_to_mel(nyquist);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(i as f64 * max_mel / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel in 0..n_mels {
        let (left, center, right) = (mel_points[mel], mel_points[mel + 1], mel_points[mel + 2]);
        let norm = 2.0 / (right - left);
        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - left) / (center - left);
            let falling = (right - freq) / (right - center);
            let weight = rising.min(falling).max(0.0);
            filters[mel * n_freqs + bin] = (weight * norm) as f32;
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parsing() {
        let variant: WhisperVariant = "base.en".parse().unwrap();
        assert_eq!(variant.size, ModelSize::Base);
        assert!(variant.english_only);
        assert_eq!(variant.repo_name(), "openai/whisper-base.en");
        assert!(!variant.is_multilingual());

        let variant: WhisperVariant = "MEDIUM".parse().unwrap();
        assert_eq!(variant.repo_name(), "openai/whisper-medium");
        assert!(variant.is_multilingual());

        assert!("huge".parse::<WhisperVariant>().is_err());
    }

    #[test]
    fn test_large_has_no_english_only_checkpoint() {
        let variant: WhisperVariant = "large.en".parse().unwrap();
        assert_eq!(variant.repo_name(), "openai/whisper-large-v2");
        assert!(variant.is_multilingual());
    }

    #[test]
    fn test_mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let filters = mel_filter_bank(16_000, 400, 80);
        assert_eq!(filters.len(), 80 * 201);
        assert!(filters.iter().all(|w| *w >= 0.0));

        // Every filter is non-empty and their peaks move up in frequency.
        let peaks: Vec<usize> = filters
            .chunks(201)
            .map(|row| {
                assert!(row.iter().any(|w| *w > 0.0));
                row.iter()
                    .enumerate()
                    .fold((0, 0.0f32), |best, (i, &w)| if w > best.1 { (i, w) } else { best })
                    .0
            })
            .collect();
        assert!(peaks.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn test_repetition_guard() {
        assert!(!is_repetitive(&[1, 2, 3], 4));
        assert!(is_repetitive(&[7, 7, 7], 7));
        assert!(is_repetitive(&[1, 2, 3, 1, 2], 3));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5], 6));
    }
}
