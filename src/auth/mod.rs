use log::{ info, warn };
use crate::api::{ ApiError, ChatApi };
use crate::models::chat::User;
use crate::models::wire::Credentials;

pub const PASSWORD_HINT: &str = "Password should be at least 8 characters long";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Signup,
}

/// Performs the backend call matching `mode`.
pub async fn authenticate(
    api: &dyn ChatApi,
    mode: AuthMode,
    credentials: &Credentials
) -> Result<User, ApiError> {
    match mode {
        AuthMode::Login => api.login(&credentials.email, &credentials.password).await,
        AuthMode::Signup => api.signup(&credentials.email, &credentials.password).await,
    }
}

/// Email and password form shared by the login and signup screens.
#[derive(Debug, Clone)]
pub struct AuthForm {
    mode: AuthMode,
    pub email: String,
    pub password: String,
    loading: bool,
    error: Option<String>,
}

impl AuthForm {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            email: String::new(),
            password: String::new(),
            loading: false,
            error: None,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Signup only; the backend decides what it accepts.
    pub fn hint(&self) -> Option<&'static str> {
        match self.mode {
            AuthMode::Signup => Some(PASSWORD_HINT),
            AuthMode::Login => None,
        }
    }

    /// Returns the credentials to submit, or `None` while a previous
    /// submission is outstanding.
    pub fn begin_submit(&mut self) -> Option<Credentials> {
        if self.loading {
            return None;
        }
        self.loading = true;
        self.error = None;
        Some(Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        })
    }

    pub fn finish_submit(&mut self, result: Result<User, ApiError>) -> Option<User> {
        self.loading = false;
        match result {
            Ok(user) => {
                info!("{:?} succeeded for {}", self.mode, user.email);
                self.password.clear();
                Some(user)
            }
            Err(e) => {
                warn!("{:?} failed for {}: {}", self.mode, self.email, e);
                self.error = Some(e.to_string());
                None
            }
        }
    }
}
