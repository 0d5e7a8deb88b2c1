//! # Pronunciation Coach - Main Application Entry Point
//!
//! An Actix-web server that scores how well a learner pronounced a reference
//! sentence, phoneme by phoneme, and suggests tips for the weak sounds.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: request handling and model downloads are asynchronous
//! - **trait objects**: `Arc<dyn Trait>` lets the pipeline run against real
//!   models in production and small fakes in tests
//! - **Result<T, E>**: every startup step either succeeds or aborts with context
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **state**: shared application state and metrics
//! - **audio**: ffmpeg-based decoding of uploads into 16kHz mono PCM
//! - **transcription**: Whisper speech-to-text for the "did they say it" check
//! - **acoustic**: wav2vec2 phoneme recognizer producing per-frame log-probabilities
//! - **phonetics**: dictionary transcription and ARPAbet → IPA translation
//! - **scoring**: alignment, aggregation and normalization of phoneme scores
//! - **feedback**: LLM pronunciation tips and text-to-speech
//! - **assessment**: the per-request pipeline tying everything together
//! - **health / middleware / handlers / error**: the HTTP surface

mod acoustic;
mod assessment;
mod audio;
mod config;
mod device;
mod error;
mod feedback;
mod handlers;
mod health;
mod hub;
mod middleware;
mod phonetics;
mod scoring;
mod state;
mod transcription;

use acoustic::Wav2Vec2Scorer;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use assessment::{Assessor, Collaborators};
use audio::FfmpegDecoder;
use config::AppConfig;
use feedback::{ChatTipGenerator, OpenAiSpeechClient};
use phonetics::CmuDictTranscriber;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperRecognizer;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Loads the models** (dictionary, Whisper, wav2vec2); any failure aborts startup
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate()?;

    info!("Starting pronunciation-coach v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let device = device::create_device_from_string(&config.models.device);

    let transcriber = CmuDictTranscriber::load_or_fetch(&config.models.cmudict_path, &config.models.cmudict_url)
        .await
        .with_context(|| format!("Failed to load pronouncing dictionary {}", config.models.cmudict_path))?;
    let recognizer = WhisperRecognizer::load(&config.models.whisper_model, device.clone())
        .await
        .context("Failed to load the speech recognizer")?;
    let acoustic = Wav2Vec2Scorer::load(&config.models, device.clone())
        .await
        .context("Failed to load the acoustic model")?;

    let api_key = config.feedback_api_key();
    if api_key.is_none() {
        warn!(
            "{} is not set; tips will fall back to the default text and TTS will fail",
            config.feedback.api_key_env
        );
    }

    let collaborators = Collaborators {
        decoder: Arc::new(FfmpegDecoder::new(config.audio.ffmpeg_path.clone(), config.audio.sample_rate)),
        recognizer: Arc::new(recognizer),
        acoustic: Arc::new(acoustic),
        transcriber: Arc::new(transcriber),
        tips: Arc::new(ChatTipGenerator::new(config.feedback.clone(), api_key.clone())),
    };
    let assessor = Arc::new(Assessor::new(
        collaborators,
        config.performance.max_concurrent_assessments,
    ));
    let synthesizer = Arc::new(OpenAiSpeechClient::new(config.feedback.clone(), api_key));

    let app_state = AppState::new(config.clone(), assessor, synthesizer, device::describe(&device));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cors_origins = config.server.cors_origins.clone();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| {
                if origin == "*" {
                    cors.allow_any_origin()
                } else {
                    cors.allowed_origin(origin)
                }
            })
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order of registration for requests
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/assessment", web::post().to(handlers::assess_pronunciation))
                    .route("/tts", web::post().to(handlers::text_to_speech)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/", web::get().to(health::root))
            .default_service(web::to(health::not_found))
    })
    .bind(&bind_addr)?
    // We handle signals ourselves so in-flight assessments can finish
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "pronunciation_coach=trace")
/// - If not set, defaults to "pronunciation_coach=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pronunciation_coach=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve when SIGINT (Ctrl+C) or, on Unix, SIGTERM arrives.
///
/// A handler that cannot be installed is logged and never fires, so the
/// other signal still works.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
