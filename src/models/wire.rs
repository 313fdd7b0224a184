use serde::{ Serialize, Deserialize };
use super::chat::Sender;

#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewConversation {
    pub user_id: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub conversation_id: i64,
    pub message: String,
    pub sender: Sender,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatReply {
    pub message: String,
}

/// One entry of `GET /messages`.
#[derive(Clone, Debug, Deserialize)]
pub struct StoredMessage {
    pub sender: Sender,
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VoiceReply {
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub ai_message: Option<String>,
    /// Base64 encoded synthesized speech.
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}
