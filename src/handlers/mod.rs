//! HTTP request handlers for the `/api/v1` endpoints.

pub mod assessment;
pub mod config;
pub mod tts;

pub use assessment::assess_pronunciation;
pub use config::{get_config, update_config};
pub use tts::text_to_speech;
