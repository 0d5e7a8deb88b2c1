//! `POST /api/v1/tts`: speak a reference sentence so the learner can hear it first.

use crate::{assessment::SpeechRequest, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use tracing::info;

pub async fn text_to_speech(
    state: web::Data<AppState>,
    body: web::Json<SpeechRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let text = request.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }

    let audio = state
        .synthesizer
        .synthesize(text, request.voice.as_deref())
        .await?;
    info!("Synthesized {} bytes of speech for {} characters", audio.len(), text.len());

    Ok(HttpResponse::Ok().content_type("audio/mpeg").body(audio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fake_state;
    use actix_web::{
        http::{header, StatusCode},
        test, App,
    };
    use serde_json::json;

    #[actix_web::test]
    async fn test_tts_returns_audio() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/tts", web::post().to(text_to_speech)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tts")
            .set_json(json!({ "text": " The cat sat. " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/mpeg");
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"The cat sat.");
    }

    #[actix_web::test]
    async fn test_blank_text_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/tts", web::post().to(text_to_speech)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tts")
            .set_json(json!({ "text": "   ", "voice": "nova" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
