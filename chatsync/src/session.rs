//! Injected credential/session provider.
//!
//! The engine never reads auth state from globals. The UI layer sets the
//! token at login and clears it at logout; the transport and the HTTP
//! client read it at the moment a connection or request is made, so a
//! token rotated mid-session is picked up on the next attempt.

use parking_lot::RwLock;

/// Source of the authentication token attached to outbound connections
/// and requests.
pub trait CredentialProvider: Send + Sync {
    /// The current session token, if a session is active.
    fn token(&self) -> Option<String>;
}

/// Simple in-memory session credential store.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    token: RwLock<Option<String>>,
}

impl SessionCredentials {
    /// Create an empty (logged-out) credential store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Set the session token (call at login).
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Clear the session token (call at logout).
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl CredentialProvider for SessionCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }
}
