//! # Audio Module
//!
//! Decodes uploaded recordings into the mono 16kHz float PCM both speech
//! models consume.

pub mod decoder;

pub use decoder::{AudioDecoder, DecodedAudio, FfmpegDecoder};
