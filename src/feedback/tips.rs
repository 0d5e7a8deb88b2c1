//! # Tip Generator
//!
//! Asks an OpenAI-compatible chat model for one short, physical tip on how to
//! produce a sound the learner got wrong.
//!
//! ## Failure Policy:
//! A tip is a nice-to-have. Timeouts, HTTP errors and empty answers are logged
//! and replaced by the configured fallback text; they never fail an assessment.

use crate::config::FeedbackConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a world-class American English pronunciation coach. \
Your feedback is always positive, encouraging, specific, and actionable. \
You focus on the physical aspects of making the sound: tongue position, lip shape, and airflow. \
Keep your advice concise and easy to understand, ideally in 2-3 short sentences. \
Do not start with greetings or filler phrases like 'Certainly!' or 'Here's a tip'. \
Directly provide the tip.";

fn user_prompt(phoneme: &str, word: &str, sentence: &str) -> String {
    format!(
        "I'm practicing the sentence: \"{sentence}\".\n\
         I'm having trouble with the '{phoneme}' sound in the word '{word}'.\n\
         Give me a specific tip on how to physically produce the '{phoneme}' sound correctly."
    )
}

/// Generated advice, and whether it is the canned fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tip {
    pub text: String,
    pub fallback: bool,
}

/// Pronunciation advice for one phoneme of one word.
///
/// Infallible by contract: implementations substitute a fallback instead of
/// returning an error.
#[async_trait]
pub trait TipGenerator: Send + Sync {
    async fn tip(&self, phoneme: &str, word: &str, sentence: &str) -> Tip;
}

#[derive(Debug, Error)]
enum TipError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("response had no tip text")]
    Empty,

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client (`POST {api_base}/chat/completions`).
pub struct ChatTipGenerator {
    client: reqwest::Client,
    settings: FeedbackConfig,
    api_key: Option<String>,
}

impl ChatTipGenerator {
    pub fn new(settings: FeedbackConfig, api_key: Option<String>) -> Self {
        if api_key.is_none() {
            warn!(
                "{} is not set; tip requests will be sent without authentication",
                settings.api_key_env
            );
        }
        Self {
            client: reqwest::Client::new(),
            settings,
            api_key,
        }
    }

    async fn request_tip(&self, phoneme: &str, word: &str, sentence: &str) -> Result<String, TipError> {
        let prompt = user_prompt(phoneme, word, sentence);
        let body = ChatRequest {
            model: &self.settings.llm_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let url = format!("{}/chat/completions", self.settings.api_base.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TipError::Status { status, body });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(TipError::Empty)
    }
}

#[async_trait]
impl TipGenerator for ChatTipGenerator {
    async fn tip(&self, phoneme: &str, word: &str, sentence: &str) -> Tip {
        let limit = Duration::from_millis(self.settings.timeout_ms);
        let result = match tokio::time::timeout(limit, self.request_tip(phoneme, word, sentence)).await {
            Ok(result) => result,
            Err(_) => Err(TipError::Timeout(limit)),
        };

        match result {
            Ok(text) => {
                debug!(phoneme, word, "Generated tip");
                Tip {
                    text,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(phoneme, word, "Tip generation failed, using fallback: {}", e);
                Tip {
                    text: self.settings.fallback_tip.clone(),
                    fallback: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> FeedbackConfig {
        FeedbackConfig {
            api_base: server.uri(),
            timeout_ms: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_user_prompt_names_sound_word_and_sentence() {
        let prompt = user_prompt("θ", "think", "I think so.");
        assert!(prompt.contains("\"I think so.\""));
        assert!(prompt.contains("the 'θ' sound in the word 'think'"));
    }

    #[tokio::test]
    async fn test_tip_from_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "temperature": 0.5,
                "max_tokens": 100
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  Touch your tongue to your teeth.  "}}]
            })))
            .mount(&server)
            .await;

        let generator = ChatTipGenerator::new(settings(&server), Some("test-key".into()));
        let tip = generator.tip("θ", "think", "I think so.").await;
        assert_eq!(tip.text, "Touch your tongue to your teeth.");
        assert!(!tip.fallback);
    }

    #[tokio::test]
    async fn test_server_error_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let generator = ChatTipGenerator::new(settings(&server), None);
        let tip = generator.tip("æ", "cat", "The cat sat.").await;
        assert!(tip.fallback);
        assert_eq!(tip.text, "Sorry, I was unable to generate a tip at this moment.");
    }

    #[tokio::test]
    async fn test_slow_service_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(serde_json::json!({
                        "choices": [{"message": {"content": "too late"}}]
                    })),
            )
            .mount(&server)
            .await;

        let generator = ChatTipGenerator::new(settings(&server), None);
        let tip = generator.tip("æ", "cat", "The cat sat.").await;
        assert!(tip.fallback);
    }

    #[tokio::test]
    async fn test_empty_answer_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "   "}}]
            })))
            .mount(&server)
            .await;

        let generator = ChatTipGenerator::new(settings(&server), None);
        assert!(generator.tip("æ", "cat", "The cat sat.").await.fallback);
    }
}
