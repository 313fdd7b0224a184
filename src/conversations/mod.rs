use log::{ debug, info, warn };
use crate::api::ApiError;
use crate::chat::next_id;
use crate::format;
use crate::markdown;
use crate::models::chat::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub user_id: i64,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: i64,
    pub preview: String,
    pub date: String,
}

/// The signed-in user's conversations, in backend order.
#[derive(Debug)]
pub struct ConversationsList {
    user_id: i64,
    conversations: Vec<Conversation>,
    error: Option<String>,
    pending_load: Option<LoadTicket>,
    creating: bool,
}

impl ConversationsList {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            conversations: Vec::new(),
            error: None,
            pending_load: None,
            creating: false,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, index: usize) -> Option<&Conversation> {
        self.conversations.get(index)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some() || self.creating
    }

    /// Rebinds the list to another user. Returns `true` when the identity
    /// changed and the list must be fetched again.
    pub fn set_user(&mut self, user_id: i64) -> bool {
        if user_id == self.user_id {
            return false;
        }
        self.user_id = user_id;
        self.conversations.clear();
        self.error = None;
        self.pending_load = None;
        true
    }

    pub fn begin_load(&mut self) -> LoadTicket {
        let ticket = LoadTicket {
            user_id: self.user_id,
            generation: next_id(),
        };
        self.pending_load = Some(ticket);
        self.error = None;
        ticket
    }

    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Conversation>, ApiError>
    ) -> bool {
        if self.pending_load != Some(ticket) {
            debug!("Discarding stale conversation list for user {}", ticket.user_id);
            return false;
        }
        self.pending_load = None;
        match result {
            Ok(conversations) => {
                info!("Loaded {} conversations for user {}", conversations.len(), self.user_id);
                self.conversations = conversations;
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                self.error = Some(e.to_string());
            }
        }
        true
    }

    /// Returns the user id to create a conversation for, or `None` while
    /// another request is outstanding.
    pub fn begin_create(&mut self) -> Option<i64> {
        if self.is_loading() {
            return None;
        }
        self.creating = true;
        self.error = None;
        Some(self.user_id)
    }

    /// On success the caller navigates straight into the new conversation.
    pub fn finish_create(&mut self, result: Result<Conversation, ApiError>) -> Option<Conversation> {
        self.creating = false;
        match result {
            Ok(conversation) => {
                info!("Created conversation {}", conversation.id);
                Some(conversation)
            }
            Err(e) => {
                warn!("Failed to create conversation: {}", e);
                self.error = Some(e.to_string());
                None
            }
        }
    }

    pub fn rows(&self) -> Vec<ConversationRow> {
        self.conversations
            .iter()
            .map(|c| ConversationRow {
                id: c.id,
                preview: markdown::preview(c.latest_message.as_deref()),
                date: format::conversation_date(c.created_at.as_deref()),
            })
            .collect()
    }
}
