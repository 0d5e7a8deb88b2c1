//! # Transcription Module
//!
//! Speech-to-text with Whisper via the Candle-rs framework. An assessment only
//! scores pronunciation when the learner actually said the reference sentence;
//! this module produces the transcript that check compares against.
//!
//! ## Key Components:
//! - **model**: Whisper checkpoint loading, mel features and greedy decoding
//! - **engine**: the `SpeechRecognizer` trait and its Whisper implementation
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default (`base.en`) for short English sentences
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good accuracy
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;

pub use engine::{SpeechRecognizer, WhisperRecognizer};
