//! Request and response bodies of the assessment endpoint.

use serde::{Deserialize, Serialize};

/// Score and optional coaching for one phoneme of one word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeScore {
    /// Stress-marked ARPAbet symbol, e.g. `"AE1"`
    pub phoneme: String,
    /// 1.0 (poor) to 5.0 (native-like), one decimal
    pub score: f32,
    /// Present only when the score is below the tip threshold
    pub feedback_tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAnalysis {
    /// The word as written in the reference sentence
    pub word: String,
    pub phonemes: Vec<PhonemeScore>,
}

/// Full response of `POST /api/v1/assessment`.
///
/// `words` is empty whenever `is_correct` is false: a recording of a
/// different sentence is not scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessorResponse {
    pub is_correct: bool,
    pub user_transcript: String,
    pub words: Vec<WordAnalysis>,
}

/// Body of `POST /api/v1/tts`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization() {
        let response = AssessorResponse {
            is_correct: true,
            user_transcript: "I ship".into(),
            words: vec![WordAnalysis {
                word: "ship".into(),
                phonemes: vec![
                    PhonemeScore {
                        phoneme: "SH".into(),
                        score: 4.6,
                        feedback_tip: None,
                    },
                    PhonemeScore {
                        phoneme: "IH1".into(),
                        score: 2.1,
                        feedback_tip: Some("Keep your tongue high and forward.".into()),
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["is_correct"], true);
        assert_eq!(json["words"][0]["phonemes"][0]["feedback_tip"], serde_json::Value::Null);
        assert_eq!(json["words"][0]["phonemes"][1]["phoneme"], "IH1");
    }

    #[test]
    fn test_speech_request_voice_is_optional() {
        let request: SpeechRequest = serde_json::from_str(r#"{"text": "Hello"}"#).unwrap();
        assert_eq!(request.text, "Hello");
        assert!(request.voice.is_none());
    }
}
