use reqwest::Client as HttpClient;
use reqwest::header::ACCEPT;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use async_trait::async_trait;
use log::{ debug, info, warn };
use url::Url;
use super::{ voice_error_message, ApiError, ChatApi };
use crate::media::AudioClip;
use crate::models::chat::{ Conversation, Sender, User };
use crate::models::wire::{
    ChatReply,
    ChatRequest,
    Credentials,
    NewConversation,
    StoredMessage,
    VoiceReply,
};

const VOICE_FILE_NAME: &str = "recording.webm";

#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: HttpClient,
    base_url: String,
}

impl HttpApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let parsed = Url::parse(base_url).map_err(|e|
            ApiError::InvalidBaseUrl(format!("{}: {}", base_url, e))
        )?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn post_credentials(&self, route: &str, email: &str, password: &str) -> Result<User, ApiError> {
        let url = self.endpoint(route);
        debug!("POST {}", url);
        let req = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp = self.http.post(&url).json(&req).send().await?;
        read_json(resp, route).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, route: &str) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!("{} failed with {}: {}", route, status, body);
        return Err(ApiError::Server { status: status.as_u16(), body });
    }
    let data = resp.json::<T>().await?;
    Ok(data)
}

#[async_trait]
impl ChatApi for HttpApiClient {
    async fn signup(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.post_credentials("/signup", email, password).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.post_credentials("/login", email, password).await
    }

    async fn create_conversation(&self, user_id: i64) -> Result<Conversation, ApiError> {
        let url = self.endpoint("/conversations");
        debug!("POST {} user_id={}", url, user_id);
        let resp = self.http.post(&url).json(&(NewConversation { user_id })).send().await?;
        read_json(resp, "/conversations").await
    }

    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, ApiError> {
        let route = format!("/user/{}/conversations", user_id);
        let url = self.endpoint(&route);
        debug!("GET {}", url);
        let resp = self.http.get(&url).send().await?;
        read_json(resp, &route).await
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<StoredMessage>, ApiError> {
        let url = self.endpoint("/messages");
        debug!("GET {} conversation_id={}", url, conversation_id);
        let resp = self.http
            .get(&url)
            .query(&[("conversation_id", conversation_id)])
            .send().await?;
        read_json(resp, "/messages").await
    }

    async fn send_message(&self, conversation_id: i64, message: &str) -> Result<String, ApiError> {
        let url = self.endpoint("/chat");
        debug!("POST {} conversation_id={}", url, conversation_id);
        let req = ChatRequest {
            conversation_id,
            message: message.to_string(),
            sender: Sender::User,
        };
        let resp = self.http.post(&url).json(&req).send().await?;
        let reply: ChatReply = read_json(resp, "/chat").await?;
        Ok(reply.message)
    }

    async fn send_voice(
        &self,
        conversation_id: i64,
        user_id: i64,
        clip: AudioClip
    ) -> Result<VoiceReply, ApiError> {
        let url = self.endpoint("/voice-chat");
        debug!(
            "POST {} conversation_id={} user_id={} bytes={}",
            url,
            conversation_id,
            user_id,
            clip.bytes.len()
        );

        let part = multipart::Part
            ::bytes(clip.bytes.to_vec())
            .file_name(VOICE_FILE_NAME)
            .mime_str(&clip.mime)
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let resp = self.http
            .post(&url)
            .query(&[("conversation_id", conversation_id), ("user_id", user_id)])
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("/voice-chat failed with {}: {}", status, body);
            return Err(ApiError::Server {
                status: status.as_u16(),
                body: voice_error_message(&body),
            });
        }

        let data = resp.json::<VoiceReply>().await?;
        info!(
            "Voice response received: message_length={}, has_audio={}, audio_size={}",
            data.ai_message.as_deref().map(|m| m.chars().count()).unwrap_or(0),
            data.audio_data.is_some(),
            data.audio_data.as_deref().map(str::len).unwrap_or(0)
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = HttpApiClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.endpoint("/login"), "http://localhost:8000/login");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(HttpApiClient::new("not a url"), Err(ApiError::InvalidBaseUrl(_))));
        assert!(matches!(HttpApiClient::new("mailto:x@y.z"), Err(ApiError::InvalidBaseUrl(_))));
    }
}
