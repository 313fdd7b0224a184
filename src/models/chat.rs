use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub latest_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    #[serde(rename = "AI")]
    Ai,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "User"),
            Sender::Ai => write!(f, "AI"),
        }
    }
}

/// A message as held by an open chat view. The backend does not send
/// timestamps, so the client stamps the moment it received or created it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, message: impl Into<String>) -> Self {
        Self {
            sender,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(Sender::User, message)
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self::new(Sender::Ai, message)
    }
}
