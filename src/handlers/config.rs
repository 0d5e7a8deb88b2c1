//! `GET /api/v1/config` and `PUT /api/v1/config`.

use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// The configuration as clients may see it. Secrets are never included;
/// the tip service key is only reported as present or absent.
fn public_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port,
            "cors_origins": config.server.cors_origins
        },
        "models": {
            "whisper_model": config.models.whisper_model,
            "acoustic_model": config.models.acoustic_model,
            "acoustic_weights": config.models.acoustic_weights,
            "cmudict_path": config.models.cmudict_path,
            "cmudict_url": config.models.cmudict_url,
            "device": config.models.device
        },
        "scoring": config.scoring,
        "feedback": {
            "api_base": config.feedback.api_base,
            "api_key_configured": config.feedback_api_key().is_some(),
            "llm_model": config.feedback.llm_model,
            "temperature": config.feedback.temperature,
            "max_tokens": config.feedback.max_tokens,
            "timeout_ms": config.feedback.timeout_ms,
            "max_concurrent_tips": config.feedback.max_concurrent_tips,
            "tts_model": config.feedback.tts_model,
            "tts_voice": config.feedback.tts_voice
        },
        "audio": config.audio,
        "performance": config.performance
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": public_view(&config)
    })))
}

/// Apply a partial update to the runtime-tunable settings.
///
/// ## Request body:
/// ```json
/// { "scoring": { "window_frames": 200, "tip_threshold": 3.0 } }
/// ```
/// Unknown or startup-only fields are ignored. An update that would leave the
/// configuration invalid is rejected with 400 and changes nothing.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let updated = state
        .update_config(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": public_view(&updated)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fake_state;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_get_config_hides_secrets() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["scoring"]["window_frames"], 150);
        assert!(body["config"]["feedback"].get("api_key_env").is_none());
        assert!(body["config"]["feedback"]["api_key_configured"].is_boolean());
    }

    #[actix_web::test]
    async fn test_update_config() {
        let state = web::Data::new(fake_state());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({ "scoring": { "tip_threshold": 3.0 } }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert_eq!(state.get_config().scoring.tip_threshold, 3.0);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({ "scoring": { "scale_min": 6.0 } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().scoring.scale_min, 1.0);
    }
}
