//! # Health and Metrics Endpoints
//!
//! `GET /health`, `GET /api/v1/health` and `GET /api/v1/metrics`. All of them
//! only read snapshots, so they stay fast while assessments are running.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

/// Liveness message at the root path.
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Pronunciation Coach API is running"
    }))
}

/// Fallback for paths no route matches, so clients always get the JSON error shape.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "in_flight_requests": metrics.in_flight_requests
        },
        "memory": get_memory_info(),
        // Startup fails unless every model loaded, so a running server has them all.
        "models": {
            "device": state.device,
            "whisper": { "model": config.models.whisper_model, "status": "loaded" },
            "acoustic": { "model": config.models.acoustic_model, "status": "loaded" },
            "dictionary": { "path": config.models.cmudict_path, "status": "loaded" },
            "tips": { "model": config.feedback.llm_model, "api_base": config.feedback.api_base }
        },
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats: Vec<serde_json::Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "in_flight_requests": metrics.in_flight_requests,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "assessments": metrics.assessments,
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_assessments": config.performance.max_concurrent_assessments,
            "max_concurrent_tips": config.feedback.max_concurrent_tips
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Load level, judged by how many requests are in flight against the
/// number of assessments allowed to run inference at once.
fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let capacity = config.performance.max_concurrent_assessments.max(1) as f64;
    let usage = metrics.in_flight_requests as f64 / capacity;

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "inference_usage_percent": (usage * 100.0).round(),
        "max_concurrent_assessments": config.performance.max_concurrent_assessments,
        "in_flight_requests": metrics.in_flight_requests,
        "load_warnings": if usage > 0.8 {
            vec!["Requests are queueing for inference - consider raising max_concurrent_assessments"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fake_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_models() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models"]["device"], "CPU");
        assert_eq!(body["system"]["status"], "normal");
    }

    #[actix_web::test]
    async fn test_root_message() {
        let app = test::init_service(App::new().route("/", web::get().to(root))).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Pronunciation Coach API is running");
    }

    #[actix_web::test]
    async fn test_unknown_path_is_json_404() {
        let app = test::init_service(App::new().default_service(web::to(not_found))).await;
        let req = test::TestRequest::get().uri("/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[actix_web::test]
    async fn test_system_status_thresholds() {
        let config = AppConfig::default();
        let metrics = AppMetrics {
            in_flight_requests: 4,
            ..Default::default()
        };
        assert_eq!(get_system_status(&config, &metrics)["status"], "high_load");
    }
}
