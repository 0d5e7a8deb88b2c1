//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and field)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__PORT, APP_SCORING__WINDOW_FRAMES, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impls)
//!
//! ## Sections:
//! - **server**: Where the HTTP server binds and which browser origins may call it
//! - **models**: Which speech models to download and run, and on which device
//! - **scoring**: Tuning constants of the phoneme scoring engine (window, clamp, scale)
//! - **feedback**: The text-generation service used for pronunciation tips and speech synthesis
//! - **audio**: Decoding parameters for uploaded recordings
//! - **performance**: Limits on concurrent inference

use crate::acoustic::ACOUSTIC_SAMPLE_RATE;
use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups makes it possible to hand each
/// component only the settings it needs (the scoring engine only ever sees
/// a `ScoringConfig`, the tip generator only a `FeedbackConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub scoring: ScoringConfig,
    pub feedback: FeedbackConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on (1-65535, typically 8080 for development)
/// - `cors_origins`: Browser origins allowed to call the API (the web frontend)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
    pub cors_origins: Vec<String>,
}

/// Speech model configuration settings.
///
/// ## Fields:
/// - `whisper_model`: Whisper variant used to check what the learner said ("tiny", "base.en", "small", ...)
/// - `acoustic_model`: HuggingFace repository of the phoneme-level wav2vec2 CTC model
/// - `acoustic_weights`: Weights file inside that repository (safetensors or pytorch .bin)
/// - `cmudict_path`: Path to the CMU Pronouncing Dictionary (`cmudict.dict` format)
/// - `cmudict_url`: Where to download the dictionary from when `cmudict_path` does not exist (empty disables the download)
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub acoustic_model: String,
    pub acoustic_weights: String,
    pub cmudict_path: String,
    pub cmudict_url: String,
    pub device: String,
}

/// Tuning constants of the scoring engine.
///
/// These were tuned empirically against the acoustic model and are kept
/// overridable instead of being embedded as literals.
///
/// ## Fields:
/// - `window_frames`: How many frames after the cursor each phoneme may be searched for
/// - `clamp_min` / `clamp_max`: Log-probability range mapped onto the user-facing scale
/// - `scale_min` / `scale_max`: The user-facing score range (1.0 to 5.0)
/// - `empty_cluster_score`: Neutral score for phonemes that have no acoustic symbols
/// - `tip_threshold`: Scores strictly below this get a pronunciation tip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    pub window_frames: usize,
    pub clamp_min: f32,
    pub clamp_max: f32,
    pub scale_min: f32,
    pub scale_max: f32,
    pub empty_cluster_score: f32,
    pub tip_threshold: f32,
}

/// Text-generation and speech-synthesis service settings.
///
/// Any OpenAI-compatible endpoint works (OpenAI itself, Gemini's compatibility
/// endpoint, a local Ollama server). The API key is read from the environment
/// variable named by `api_key_env`, never from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub api_base: String,
    pub api_key_env: String,
    pub llm_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub max_concurrent_tips: usize,
    pub fallback_tip: String,
    pub tts_model: String,
    pub tts_voice: String,
}

/// Audio decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate both speech models expect (16kHz)
    pub sample_rate: u32,
    /// ffmpeg binary used for compressed uploads (webm, ogg, mp3, ...)
    pub ffmpeg_path: String,
    pub max_upload_bytes: usize,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_assessments`: How many recordings may be run through the models at once
///
/// ## Tuning guidelines:
/// Each assessment runs two neural networks on a blocking thread. More permits
/// means more parallelism but also more peak memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_assessments: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_frames: 150,
            clamp_min: -10.0,
            clamp_max: 0.0,
            scale_min: 1.0,
            scale_max: 5.0,
            empty_cluster_score: 2.5,
            tip_threshold: 3.5,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            max_tokens: 100,
            timeout_ms: 10_000,
            max_concurrent_tips: 4,
            fallback_tip: "Sorry, I was unable to generate a tip at this moment.".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
        }
    }
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,                     // Common development port
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            models: ModelsConfig {
                whisper_model: "base.en".to_string(),
                acoustic_model: "moxeeeem/wav2vec2-finetuned-pronunciation-correction".to_string(),
                acoustic_weights: "model.safetensors".to_string(),
                cmudict_path: "cmudict.dict".to_string(),
                cmudict_url: "https://raw.githubusercontent.com/cmusphinx/cmudict/master/cmudict.dict".to_string(),
                device: "auto".to_string(),
            },
            scoring: ScoringConfig::default(),
            feedback: FeedbackConfig::default(),
            audio: AudioConfig {
                sample_rate: 16_000,
                ffmpeg_path: "ffmpeg".to_string(),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            performance: PerformanceConfig {
                max_concurrent_assessments: 4,
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SCORING__WINDOW_FRAMES=200`: Widen the per-phoneme search window
    /// - `APP_MODELS__WHISPER_MODEL=small`: Use a larger recognizer
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// The double underscore separates the section from the field so that
    /// field names that contain underscores survive the mapping.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Scoring ranges are non-empty and the search window is positive
    /// - Concurrency limits and timeouts are positive
    /// - The audio sample rate is positive
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.scoring.validate()?;

        if self.feedback.max_concurrent_tips == 0 {
            return Err(anyhow::anyhow!("Max concurrent tips must be greater than 0"));
        }

        if self.feedback.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Tip generation timeout must be greater than 0"));
        }

        // Both speech models are trained on 16kHz audio.
        if self.audio.sample_rate != ACOUSTIC_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Audio sample rate must be {} Hz, got {}",
                ACOUSTIC_SAMPLE_RATE,
                self.audio.sample_rate
            ));
        }

        if self.performance.max_concurrent_assessments == 0 {
            return Err(anyhow::anyhow!("Max concurrent assessments must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## What can change at runtime:
    /// Only settings that are read fresh for every assessment: the whole
    /// `scoring` section and `feedback.max_concurrent_tips`. Model choices,
    /// the bind address and service endpoints are fixed at startup because the
    /// objects that use them are built once.
    ///
    /// ## Partial updates:
    /// You can send just `{"scoring": {"window_frames": 200}}` to change only the window.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        // Parse the JSON string into a generic value
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        // Update scoring configuration if provided
        if let Some(scoring) = partial_config.get("scoring") {
            if let Some(window) = scoring.get("window_frames").and_then(|v| v.as_u64()) {
                self.scoring.window_frames = window as usize;
            }
            let float_fields: [(&str, &mut f32); 6] = [
                ("clamp_min", &mut self.scoring.clamp_min),
                ("clamp_max", &mut self.scoring.clamp_max),
                ("scale_min", &mut self.scoring.scale_min),
                ("scale_max", &mut self.scoring.scale_max),
                ("empty_cluster_score", &mut self.scoring.empty_cluster_score),
                ("tip_threshold", &mut self.scoring.tip_threshold),
            ];
            for (name, slot) in float_fields {
                if let Some(value) = scoring.get(name).and_then(|v| v.as_f64()) {
                    *slot = value as f32;
                }
            }
        }

        // Update feedback fan-out if provided
        if let Some(feedback) = partial_config.get("feedback") {
            if let Some(tips) = feedback.get("max_concurrent_tips").and_then(|v| v.as_u64()) {
                self.feedback.max_concurrent_tips = tips as usize;
            }
        }

        // Validate the updated configuration to ensure it's still valid
        self.validate()?;
        Ok(())
    }

    /// Read the tip/TTS service API key from the environment, if one is set.
    pub fn feedback_api_key(&self) -> Option<String> {
        env::var(&self.feedback.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_frames == 0 {
            return Err(anyhow::anyhow!("Scoring window must be at least one frame"));
        }
        if !(self.clamp_min < self.clamp_max) {
            return Err(anyhow::anyhow!(
                "Scoring clamp range is empty: [{}, {}]",
                self.clamp_min,
                self.clamp_max
            ));
        }
        if !(self.scale_min < self.scale_max) {
            return Err(anyhow::anyhow!(
                "Scoring scale range is empty: [{}, {}]",
                self.scale_min,
                self.scale_max
            ));
        }
        Ok(())
    }
}
