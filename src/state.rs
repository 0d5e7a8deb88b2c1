//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! simultaneously: the runtime configuration, the metrics counters, and the assessment pipeline
//! with its loaded models.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: actix-web runs one worker per core, and each worker gets a clone of `AppState`
//! - **Cheap clones**: Cloning an `Arc` copies a pointer and bumps a counter; the models are never copied
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Every assessment reads the config; `PUT /api/v1/config` occasionally writes it
//!
//! ### Lock Poisoning
//! If a thread panics while holding a `std::sync` lock, the lock is marked "poisoned" and
//! `.read()`/`.write()` return an error. The data behind these locks is always left in a
//! consistent state (single field updates), so we recover the guard with
//! `PoisonError::into_inner` instead of taking the whole server down.
//!
//! ### Trait Objects (`Arc<dyn Trait>`)
//! The assessor and synthesizer are stored behind traits, so tests can build an `AppState`
//! around fakes without loading a single model.

use crate::assessment::{AssessmentReport, AssessmentSettings, Assessor};
use crate::config::AppConfig;
use crate::feedback::SpeechSynthesizer;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (tuning fields can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (updated by the middleware and the assessment handler)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The assessment pipeline and the models behind it, loaded once at startup
    pub assessor: Arc<Assessor>,

    /// Client for the text-to-speech endpoint
    pub synthesizer: Arc<dyn SpeechSynthesizer>,

    /// Human-readable name of the compute device the models run on
    pub device: String,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// Requests currently being processed
    pub in_flight_requests: u32,

    /// Detailed metrics per route pattern (e.g. "POST /api/v1/assessment")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub assessments: AssessmentMetrics,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// What the assessment pipeline has been doing.
///
/// `degraded` counts assessments that went through at least one recovery
/// path (dropped symbols, exhausted frames, positional pairing).
#[derive(Debug, Default, Clone, Serialize)]
pub struct AssessmentMetrics {
    pub total: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub failed: u64,
    pub degraded: u64,
    pub tips_requested: u64,
    pub tip_fallbacks: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        assessor: Arc<Assessor>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        device: String,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            assessor,
            synthesizer,
            device,
            start_time: Instant::now(),
        }
    }

    fn read_config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.read_config().clone()
    }

    /// The settings one assessment runs with. Taken once per request so a
    /// concurrent config update never changes the rules halfway through.
    pub fn assessment_settings(&self) -> AssessmentSettings {
        let config = self.read_config();
        AssessmentSettings {
            scoring: config.scoring.clone(),
            max_concurrent_tips: config.feedback.max_concurrent_tips,
        }
    }

    /// Apply a partial JSON update to the runtime-tunable settings.
    ///
    /// The update is applied to a copy and validated before it replaces the
    /// live configuration, so a bad update leaves nothing half-applied. The
    /// write lock is held throughout so concurrent updates serialize.
    pub fn update_config(&self, json_str: &str) -> anyhow::Result<AppConfig> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = config.clone();
        updated.update_from_json(json_str)?;
        *config = updated.clone();
        Ok(updated)
    }

    /// Called by the middleware when a request enters the service.
    pub fn request_started(&self) {
        let mut metrics = self.write_metrics();
        metrics.request_count += 1;
        metrics.in_flight_requests += 1;
    }

    /// Called by the middleware when a request leaves the service.
    ///
    /// ## Parameters:
    /// - **endpoint**: Method plus matched route pattern, e.g. "GET /api/v1/config"
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether the response status was 4xx or 5xx
    pub fn request_finished(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        metrics.in_flight_requests = metrics.in_flight_requests.saturating_sub(1);
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Record the result of one successful assessment.
    pub fn record_assessment(&self, is_correct: bool, report: &AssessmentReport) {
        let mut metrics = self.write_metrics();
        let assessments = &mut metrics.assessments;
        assessments.total += 1;
        if is_correct {
            assessments.matched += 1;
        } else {
            assessments.mismatched += 1;
        }
        if report.is_degraded() {
            assessments.degraded += 1;
        }
        assessments.tips_requested += report.tips_requested as u64;
        assessments.tip_fallbacks += report.tip_fallbacks as u64;
    }

    pub fn record_assessment_failure(&self) {
        let mut metrics = self.write_metrics();
        metrics.assessments.total += 1;
        metrics.assessments.failed += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let state = testing::fake_state();
        state.request_started();
        state.request_started();
        state.request_finished("GET /health", 10, false);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.in_flight_requests, 1);
        assert_eq!(metrics.endpoint_metrics["GET /health"].request_count, 1);

        state.request_finished("GET /health", 30, true);
        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
        assert_eq!(metrics.in_flight_requests, 0);
        assert_eq!(metrics.error_count, 1);
    }

    #[test]
    fn test_assessment_metrics() {
        let state = testing::fake_state();
        let report = AssessmentReport {
            dropped_symbols: 1,
            tips_requested: 3,
            tip_fallbacks: 1,
            ..Default::default()
        };
        state.record_assessment(true, &report);
        state.record_assessment(false, &AssessmentReport::default());
        state.record_assessment_failure();

        let assessments = state.get_metrics_snapshot().assessments;
        assert_eq!(assessments.total, 3);
        assert_eq!(assessments.matched, 1);
        assert_eq!(assessments.mismatched, 1);
        assert_eq!(assessments.failed, 1);
        assert_eq!(assessments.degraded, 1);
        assert_eq!(assessments.tips_requested, 3);
    }

    #[test]
    fn test_invalid_update_leaves_config_unchanged() {
        let state = testing::fake_state();
        assert!(state.update_config(r#"{"scoring": {"window_frames": 0}}"#).is_err());
        assert_eq!(state.get_config().scoring.window_frames, 150);

        state.update_config(r#"{"scoring": {"window_frames": 200}}"#).unwrap();
        assert_eq!(state.assessment_settings().scoring.window_frames, 200);
    }

    #[test]
    fn test_concurrent_updates_to_different_fields_all_survive() {
        let state = testing::fake_state();
        std::thread::scope(|s| {
            for i in 0..8u32 {
                let state = &state;
                s.spawn(move || {
                    let json = if i % 2 == 0 {
                        r#"{"scoring": {"tip_threshold": 3.5}}"#
                    } else {
                        r#"{"feedback": {"max_concurrent_tips": 7}}"#
                    };
                    for _ in 0..50 {
                        state.update_config(json).unwrap();
                    }
                });
            }
        });

        let config = state.get_config();
        assert_eq!(config.scoring.tip_threshold, 3.5);
        assert_eq!(config.feedback.max_concurrent_tips, 7);
    }
}
