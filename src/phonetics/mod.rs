//! # Phonetics
//!
//! Text-side half of the scoring pipeline:
//! - **transcriber**: reference text → stress-marked ARPAbet phonemes (CMU dictionary)
//! - **translator**: ARPAbet phoneme → IPA symbols the acoustic model understands

pub mod transcriber;
pub mod translator;

pub use transcriber::{CmuDictTranscriber, PhoneticTranscriber};
pub use translator::translate_sequence;
