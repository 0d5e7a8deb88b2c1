//! # Error Handling
//!
//! This module defines the application's error types and how they're converted to HTTP responses.
//!
//! ## Two Layers of Errors:
//! - **AppError**: What an HTTP handler returns. Every variant maps to one status
//!   code and one machine-readable `type` string in the JSON body.
//! - **Domain errors** (`DecodeError`): Typed failures from a single component,
//!   built with `thiserror`, converted into an `AppError` at the handler boundary.
//!
//! ## What is NOT an error:
//! The scoring engine's local recoveries (unknown phonetic symbols, running out of
//! frames, cluster/score count mismatches, failed tip generation) never surface
//! here. They produce a well-formed but lower-fidelity result and a log line.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types, which is what makes `?` work
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait
use thiserror::Error;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: No route matches the request (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **AudioDecode**: The uploaded recording could not be decoded (400 errors)
/// - **Upstream**: An external service (speech synthesis) failed (502 errors)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("reference_text is required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (model inference failures, worker panics, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// No route matches the request
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The uploaded audio could not be turned into PCM
    AudioDecode(String),

    /// A service we call on the client's behalf failed
    Upstream(String),
}

/// Implementation of the Display trait for AppError.
///
/// ## Purpose:
/// This trait defines how errors are formatted as human-readable strings.
/// It's used when you print an error or convert it to a string.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::AudioDecode(msg) => write!(f, "Audio decode error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream service error: {}", msg),
        }
    }
}

impl AppError {
    /// HTTP status, machine-readable type and message for this error.
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
            AppError::AudioDecode(msg) => (StatusCode::BAD_REQUEST, "audio_decode_error", msg.as_str()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.as_str()),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## Purpose:
/// This trait converts our custom errors into HTTP responses that clients can understand.
/// It automatically handles the conversion when an error is returned from a handler.
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "audio_decode_error",
///     "message": "ffmpeg exited with status 1: Invalid data found when processing input",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        // Build the HTTP response with JSON body
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
/// Model inference reports failures through anyhow, so this is the path they take.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Automatic conversion from JSON parsing errors to AppError.
///
/// ## Why BadRequest:
/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they should result in a 400 (Bad Request) response, not a 500 (Internal Server Error).
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors to AppError.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        // A server without ffmpeg is misconfigured, not a bad upload.
        if matches!(err, DecodeError::FfmpegMissing) {
            AppError::Internal(err.to_string())
        } else {
            AppError::AudioDecode(err.to_string())
        }
    }
}

impl From<crate::feedback::SynthesisError> for AppError {
    fn from(err: crate::feedback::SynthesisError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

/// Why an uploaded recording could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("audio upload is empty")]
    Empty,

    #[error("unsupported audio: {0}")]
    Unsupported(String),

    #[error("ffmpeg exited with status {status:?}: {stderr}")]
    Ffmpeg { status: Option<i32>, stderr: String },

    #[error("ffmpeg not found; install it and make sure it is on PATH")]
    FfmpegMissing,

    #[error("I/O error while decoding audio: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// async fn assess(...) -> AppResult<AssessmentOutcome> {
///     // This is equivalent to: Result<AssessmentOutcome, AppError>
/// }
/// ```
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::AudioDecode("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Upstream("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Internal("oops".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: AppError = DecodeError::Empty.into();
        assert!(matches!(err, AppError::AudioDecode(_)));

        let err: AppError = DecodeError::FfmpegMissing.into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_error_body_shape() {
        let response = AppError::BadRequest("missing field".into()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
