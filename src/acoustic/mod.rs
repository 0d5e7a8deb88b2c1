//! # Acoustic Module
//!
//! The phoneme-level speech model. Where Whisper answers "what words were
//! said", this model answers "how likely is each phonetic symbol at each 20ms
//! frame", which is what pronunciation scoring needs.
//!
//! ## Components:
//! - **model**: wav2vec2-for-CTC written against candle
//! - **scorer**: the `AcousticScorer` seam plus the hub-backed implementation

pub mod model;
pub mod scorer;

pub use scorer::{AcousticScorer, Wav2Vec2Scorer, ACOUSTIC_SAMPLE_RATE};
