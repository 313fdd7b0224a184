use log::{ info, warn };
use std::fs;
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, Mutex };
use thiserror::Error;
use crate::models::chat::User;

const APP_DIR: &str = "hotel-chat";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored session is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable client-side storage holding the signed-in user and nothing else.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<User>, SessionError>;
    fn save(&self, user: &User) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self) -> Result<Option<User>, SessionError> {
        (**self).load()
    }

    fn save(&self, user: &User) -> Result<(), SessionError> {
        (**self).save(user)
    }

    fn clear(&self) -> Result<(), SessionError> {
        (**self).clear()
    }
}

pub fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SESSION_FILE)
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<User>, SessionError> {
        let json_str = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => {
                return Err(e.into());
            }
        };
        let user: User = serde_json::from_str(&json_str)?;
        Ok(Some(user))
    }

    fn save(&self, user: &User) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(user)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<User>, SessionError> {
        let slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        match slot.as_deref() {
            Some(json_str) => Ok(Some(serde_json::from_str(json_str)?)),
            None => Ok(None),
        }
    }

    fn save(&self, user: &User) -> Result<(), SessionError> {
        let json_str = serde_json::to_string(user)?;
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(json_str);
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

/// The signed-in user plus the store mirroring it. Passed explicitly to the
/// shell; nothing else touches storage.
pub struct Session {
    store: Box<dyn SessionStore>,
    user: Option<User>,
}

impl Session {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self { store, user: None }
    }

    /// Startup hook. An unreadable stored session counts as signed out.
    pub fn restore(&mut self) -> Option<&User> {
        self.user = match self.store.load() {
            Ok(Some(user)) => {
                info!("Restored session for {}", user.email);
                Some(user)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring stored session: {}", e);
                None
            }
        };
        self.user.as_ref()
    }

    pub fn sign_in(&mut self, user: User) {
        if let Err(e) = self.store.save(&user) {
            warn!("Failed to persist session: {}", e);
        }
        self.user = Some(user);
    }

    pub fn sign_out(&mut self) {
        self.user = None;
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored session: {}", e);
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}
