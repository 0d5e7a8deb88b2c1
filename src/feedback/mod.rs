//! # Feedback Module
//!
//! The two calls the service makes to an external language/speech provider:
//! tips for badly pronounced sounds, and reading sentences aloud.

pub mod speech;
pub mod tips;

pub use speech::{OpenAiSpeechClient, SpeechSynthesizer, SynthesisError};
pub use tips::{ChatTipGenerator, Tip, TipGenerator};
