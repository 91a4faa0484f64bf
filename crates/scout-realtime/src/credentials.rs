//! Session credential access.
//!
//! The client resolves the credential at the start of every connection
//! attempt, so a token refreshed between attempts is picked up on the next
//! reconnect without any extra wiring.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// Source of the session credential appended to the stream URL.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential, or `None` when no session exists.
    async fn credential(&self) -> Option<String>;
}

/// Whether `token` counts as a session. An empty token does not.
pub fn is_usable_token(token: Option<&str>) -> bool {
    token.is_some_and(|t| !t.is_empty())
}

/// In-memory session token holder.
///
/// Doubles as the session-presence signal for the supervisor: [`Self::watch`]
/// hands out receivers that observe every login and logout.
#[derive(Debug)]
pub struct SessionStore {
    token: watch::Sender<Option<String>>,
}

impl SessionStore {
    /// Empty store (logged out).
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        Self { token }
    }

    /// Store that starts with a session token.
    pub fn with_token(token: impl Into<String>) -> Self {
        let (token, _) = watch::channel(Some(token.into()));
        Self { token }
    }

    /// Record a new session token (login or refresh).
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let _ = self.token.send_replace(Some(token));
        debug!("session token stored");
    }

    /// Forget the session token (logout or expiry).
    pub fn clear(&self) {
        let previous = self.token.send_replace(None);
        if previous.is_some() {
            debug!("session token cleared");
        }
    }

    /// Current token, if any.
    pub fn current(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Whether a usable session token is present.
    pub fn is_present(&self) -> bool {
        is_usable_token(self.token.borrow().as_deref())
    }

    /// Receiver that observes token changes.
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for SessionStore {
    async fn credential(&self) -> Option<String> {
        self.current().filter(|t| is_usable_token(Some(t.as_str())))
    }
}
