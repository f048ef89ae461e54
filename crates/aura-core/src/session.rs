//! Durable per-browser session identity.
//!
//! The token lives in the visitor's cookie jar, abstracted as a
//! [`ClientStore`]. It is minted once, written immediately, and every later
//! read returns the same value for the life of the cookie.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Cookie holding the session token.
pub const SESSION_COOKIE: &str = "sessionId";

/// Anonymous per-browser identifier that joins visitor, quiz, lead and
/// purchase rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh random (UUID v4) token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a stored value. Anything that is not a UUID is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim())
            .ok()
            .map(|uuid| Self(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Attributes applied to values written into the client store.
///
/// Values are always path-scoped to `/` with `SameSite=Lax`; `secure` adds the
/// `Secure` flag when the funnel is served over HTTPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CookieOptions {
    pub secure: bool,
}

/// Durable client-side key/value store (the visitor's cookie jar).
///
/// A value written with [`ClientStore::set`] must be returned by subsequent
/// [`ClientStore::get`] calls on the same store.
pub trait ClientStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, options: CookieOptions) -> anyhow::Result<()>;
}

/// In-process [`ClientStore`], used where no real cookie jar is available.
#[derive(Debug, Default)]
pub struct MemoryClientStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(name: &str, value: &str) -> Self {
        let store = Self::new();
        store
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
        store
    }
}

impl ClientStore for MemoryClientStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, value: &str, _options: CookieOptions) -> anyhow::Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Creates and retrieves the session token.
#[derive(Debug, Clone, Copy)]
pub struct SessionIdentity {
    options: CookieOptions,
}

impl SessionIdentity {
    pub fn new(secure: bool) -> Self {
        Self {
            options: CookieOptions { secure },
        }
    }

    pub fn cookie_options(&self) -> CookieOptions {
        self.options
    }

    /// Return the persisted token, minting and persisting one if absent.
    ///
    /// An unreadable stored value or a failed write yields a new token rather
    /// than an error; the visitor then carries a new identity.
    pub fn get_or_create_session_token(&self, store: &dyn ClientStore) -> SessionToken {
        if let Some(raw) = store.get(SESSION_COOKIE) {
            if let Some(token) = SessionToken::parse(&raw) {
                return token;
            }
            warn!(value = %raw, "Unreadable session cookie, minting a new session token");
        }

        let token = SessionToken::generate();
        if let Err(e) = store.set(SESSION_COOKIE, token.as_str(), self.options) {
            warn!(session = %token, error = %e, "Session cookie not persisted; identity is ephemeral");
        }
        token
    }
}
