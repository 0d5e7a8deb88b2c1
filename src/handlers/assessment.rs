//! # Assessment Endpoint
//!
//! `POST /api/v1/assessment` takes a multipart form with two fields:
//! - `reference_text`: the sentence the learner was asked to read
//! - `audio_file`: the recording, in any format ffmpeg understands
//!
//! ## Response:
//! ```json
//! {
//!   "is_correct": true,
//!   "user_transcript": "the cat",
//!   "words": [
//!     { "word": "cat", "phonemes": [ { "phoneme": "K", "score": 4.2, "feedback_tip": null } ] }
//!   ]
//! }
//! ```
//!
//! ## Rust Concepts:
//! - **Streams**: the multipart body arrives as a stream of fields, and each
//!   field as a stream of byte chunks, consumed with `StreamExt::next()`
//! - **Early return**: the upload limit is checked per chunk so an oversized
//!   file is rejected before it is fully buffered

use crate::{error::AppError, state::AppState};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use tracing::{info, warn};

/// The two form fields, once read.
struct AssessmentForm {
    reference_text: String,
    audio: Vec<u8>,
}

async fn read_field(field: &mut Field, limit: usize, name: &str) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BadRequest(format!(
                "{} too large (max: {} bytes)",
                name, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_form(mut payload: Multipart, max_upload_bytes: usize) -> Result<AssessmentForm, AppError> {
    let mut reference_text: Option<String> = None;
    let mut audio: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?;

        match field_name.as_str() {
            "reference_text" => {
                let bytes = read_field(&mut field, max_upload_bytes, "reference_text").await?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| AppError::BadRequest("reference_text must be UTF-8".to_string()))?;
                reference_text = Some(text);
            }
            "audio_file" => {
                audio = Some(read_field(&mut field, max_upload_bytes, "audio_file").await?);
            }
            // Drain anything else so the stream can advance to the next field.
            other => {
                warn!("Ignoring unexpected form field '{}'", other);
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
                }
            }
        }
    }

    Ok(AssessmentForm {
        reference_text: reference_text
            .ok_or_else(|| AppError::BadRequest("reference_text is required".to_string()))?,
        audio: audio.ok_or_else(|| AppError::BadRequest("audio_file is required".to_string()))?,
    })
}

pub async fn assess_pronunciation(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let max_upload_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_upload_bytes).await?;
    info!(
        "Assessment request: {} audio bytes, reference '{}'",
        form.audio.len(),
        form.reference_text
    );

    let settings = state.assessment_settings();
    match state
        .assessor
        .assess(&form.reference_text, &form.audio, &settings)
        .await
    {
        Ok(outcome) => {
            state.record_assessment(outcome.response.is_correct, &outcome.report);
            Ok(HttpResponse::Ok().json(outcome.response))
        }
        Err(e) => {
            state.record_assessment_failure();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::schema::AssessorResponse;
    use crate::state::testing::fake_state;
    use actix_web::{http::StatusCode, test, App};

    const BOUNDARY: &str = "pronunciation-test-boundary";

    fn multipart_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            if *name == "audio_file" {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"take.wav\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name
                    )
                    .as_bytes(),
                );
            } else {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
            }
            body.extend_from_slice(value);
            body.extend_from_slice(&b"\r\n"[..]);
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn request(fields: &[(&str, &[u8])]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/assessment")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(fields))
    }

    #[actix_web::test]
    async fn test_assessment_scores_matching_recording() {
        let state = web::Data::new(fake_state());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/assessment", web::post().to(assess_pronunciation)),
        )
        .await;

        let req = request(&[("reference_text", &b"Cat."[..]), ("audio_file", &b"RIFF...."[..])]).to_request();
        let body: AssessorResponse = test::call_and_read_body_json(&app, req).await;

        assert!(body.is_correct);
        assert_eq!(body.user_transcript, "cat");
        assert_eq!(body.words.len(), 1);
        assert_eq!(body.words[0].phonemes.len(), 3);
        assert!(body.words[0].phonemes.iter().all(|p| p.score > 4.5 && p.feedback_tip.is_none()));
        assert_eq!(state.get_metrics_snapshot().assessments.matched, 1);
    }

    #[actix_web::test]
    async fn test_wrong_sentence_returns_no_words() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/assessment", web::post().to(assess_pronunciation)),
        )
        .await;

        let req = request(&[("reference_text", &b"the dog"[..]), ("audio_file", &b"RIFF...."[..])]).to_request();
        let body: AssessorResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!body.is_correct);
        assert!(body.words.is_empty());
    }

    #[actix_web::test]
    async fn test_missing_audio_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/assessment", web::post().to(assess_pronunciation)),
        )
        .await;

        let req = request(&[("reference_text", &b"cat"[..])]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let state = web::Data::new(fake_state());
        state
            .config
            .write()
            .unwrap()
            .audio
            .max_upload_bytes = 16;
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/assessment", web::post().to(assess_pronunciation)),
        )
        .await;

        let audio = vec![0u8; 64];
        let req = request(&[("reference_text", &b"cat"[..]), ("audio_file", &audio[..])]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_empty_audio_is_a_decode_error() {
        let state = web::Data::new(fake_state());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/assessment", web::post().to(assess_pronunciation)),
        )
        .await;

        let req = request(&[("reference_text", &b"cat"[..]), ("audio_file", &b""[..])]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().assessments.failed, 1);
    }
}
