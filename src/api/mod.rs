pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use crate::media::AudioClip;
use crate::models::chat::{ Conversation, User };
use crate::models::wire::{ StoredMessage, VoiceReply };

pub use self::http::HttpApiClient;

pub const DEFAULT_VOICE_ERROR: &str = "Failed to process voice message";

/// Failure of a single backend call. `Display` is what the UI shows, so a
/// server rejection renders as the body text alone.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{body}")]
    Server {
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// One method per backend endpoint. Each performs exactly one request and
/// resolves or fails once; there is no retry or cancellation.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn signup(&self, email: &str, password: &str) -> Result<User, ApiError>;

    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError>;

    async fn create_conversation(&self, user_id: i64) -> Result<Conversation, ApiError>;

    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, ApiError>;

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<StoredMessage>, ApiError>;

    /// Returns the AI reply text.
    async fn send_message(&self, conversation_id: i64, message: &str) -> Result<String, ApiError>;

    async fn send_voice(
        &self,
        conversation_id: i64,
        user_id: i64,
        clip: AudioClip
    ) -> Result<VoiceReply, ApiError>;
}

/// Error text for a failed voice upload. A JSON body contributes its
/// `detail` when it has one, any other body its raw text, and everything
/// else falls back to the default.
pub fn voice_error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(parsed) =>
            match parsed.get("detail") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::String(_)) | Some(Value::Null) | None => DEFAULT_VOICE_ERROR.to_string(),
                Some(other) => other.to_string(),
            }
        Err(_) => {
            if body.is_empty() { DEFAULT_VOICE_ERROR.to_string() } else { body.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_displays_body_verbatim() {
        let err = ApiError::Server { status: 401, body: "Invalid credentials".into() };
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn voice_error_prefers_json_detail() {
        assert_eq!(voice_error_message(r#"{"detail":"Audio too short"}"#), "Audio too short");
    }

    #[test]
    fn voice_error_json_without_detail_uses_default() {
        assert_eq!(voice_error_message(r#"{"error":"x"}"#), DEFAULT_VOICE_ERROR);
        assert_eq!(voice_error_message(r#"{"detail":""}"#), DEFAULT_VOICE_ERROR);
    }

    #[test]
    fn voice_error_falls_back_to_raw_text() {
        assert_eq!(voice_error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(voice_error_message(""), DEFAULT_VOICE_ERROR);
    }

    #[test]
    fn voice_error_non_object_json_uses_default() {
        assert_eq!(voice_error_message(r#""oops""#), DEFAULT_VOICE_ERROR);
        assert_eq!(voice_error_message("[]"), DEFAULT_VOICE_ERROR);
        assert_eq!(voice_error_message("42"), DEFAULT_VOICE_ERROR);
    }

    #[test]
    fn voice_error_structured_detail_is_shown_as_json() {
        assert_eq!(voice_error_message(r#"{"detail":[{"msg":"field required"}]}"#), r#"[{"msg":"field required"}]"#);
    }
}
