use log::info;
use crate::auth::{ AuthForm, AuthMode };
use crate::chat::{ ChatView, HistoryTicket };
use crate::conversations::ConversationsList;
use crate::models::chat::{ Conversation, User };
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Login,
    Signup,
    Conversations,
    Chat,
}

/// Top-level navigation. Owns the session and whichever screens are alive.
pub struct Shell {
    session: Session,
    page: Page,
    login: AuthForm,
    signup: AuthForm,
    conversations: Option<ConversationsList>,
    chat: Option<ChatView>,
}

impl Shell {
    /// Restores a stored session if there is one and lands on the
    /// conversation list, otherwise on the login screen.
    pub fn start(mut session: Session) -> Self {
        let restored = session.restore().cloned();
        let mut shell = Self {
            session,
            page: Page::Login,
            login: AuthForm::new(AuthMode::Login),
            signup: AuthForm::new(AuthMode::Signup),
            conversations: None,
            chat: None,
        };
        if let Some(user) = restored {
            shell.enter_conversations(&user);
        }
        shell
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn user(&self) -> Option<&User> {
        self.session.user()
    }

    pub fn login_form(&mut self) -> &mut AuthForm {
        &mut self.login
    }

    pub fn signup_form(&mut self) -> &mut AuthForm {
        &mut self.signup
    }

    /// The form of the current auth page.
    pub fn auth_form(&mut self) -> Option<&mut AuthForm> {
        match self.page {
            Page::Login => Some(&mut self.login),
            Page::Signup => Some(&mut self.signup),
            _ => None,
        }
    }

    pub fn conversations(&mut self) -> Option<&mut ConversationsList> {
        self.conversations.as_mut()
    }

    pub fn chat(&mut self) -> Option<&mut ChatView> {
        self.chat.as_mut()
    }

    pub fn show_signup(&mut self) {
        if self.page == Page::Login {
            self.page = Page::Signup;
        }
    }

    pub fn show_login(&mut self) {
        if self.page == Page::Signup {
            self.page = Page::Login;
        }
    }

    /// Login or signup succeeded.
    pub fn signed_in(&mut self, user: User) {
        self.session.sign_in(user.clone());
        self.enter_conversations(&user);
    }

    fn enter_conversations(&mut self, user: &User) {
        match self.conversations.as_mut() {
            Some(list) => {
                list.set_user(user.id);
            }
            None => {
                self.conversations = Some(ConversationsList::new(user.id));
            }
        }
        self.page = Page::Conversations;
    }

    pub fn logout(&mut self) {
        if let Some(user) = self.session.user() {
            info!("Logging out {}", user.email);
        }
        self.chat = None;
        self.conversations = None;
        self.session.sign_out();
        self.login = AuthForm::new(AuthMode::Login);
        self.signup = AuthForm::new(AuthMode::Signup);
        self.page = Page::Login;
    }

    /// Opens a conversation in a fresh chat view with empty history and
    /// returns the ticket for its history fetch.
    pub fn open_conversation(&mut self, conversation: Conversation) -> Option<HistoryTicket> {
        let user = self.session.user()?.clone();
        info!("Opening conversation {}", conversation.id);
        let mut chat = ChatView::new(user, conversation);
        let ticket = chat.begin_load();
        self.chat = Some(chat);
        self.page = Page::Chat;
        Some(ticket)
    }

    /// Leaves the chat. The view and its history are dropped.
    pub fn back_to_conversations(&mut self) {
        if self.page != Page::Chat {
            return;
        }
        self.chat = None;
        self.page = Page::Conversations;
    }
}
