//! Identity and Session Correlation
//!
//! Decides, per request, whether the caller is authenticated (bearer token) or
//! anonymous (generated session id), and projects that decision onto both
//! transports:
//!
//! - REST: `Authorization: Bearer <token>` or `x-session-id: <id>`
//! - SSE: `?token=<token>` or `?sessionId=<id>` (streams cannot carry headers)
//!
//! A token always wins over a session id. The anonymous session id survives a
//! logout so that in-flight anonymous work can be adopted into an account once
//! the user signs in.
//!
//! The provider also owns the single "unauthorized" hook. Any 401, REST or
//! stream, clears the stored token and fires that hook exactly once.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::RequestBuilder;

use crate::storage::KeyValueStore;

/// Storage key for the bearer token
pub const TOKEN_KEY: &str = "genflow.auth_token";

/// Storage key for the authenticated user id
pub const USER_ID_KEY: &str = "genflow.user_id";

/// Storage key for the anonymous session id
pub const SESSION_ID_KEY: &str = "genflow.session_id";

/// Header carrying the anonymous session id on REST calls
pub const SESSION_HEADER: &str = "x-session-id";

/// Callback fired when the backend rejects the stored credentials
pub type UnauthorizedCallback = Box<dyn FnOnce() + Send>;

/// The identity a request is made under
#[derive(Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    /// Authenticated with a bearer token
    Jwt {
        /// Bearer token
        token: String,
        /// User id, when known; scopes the read cache
        user_id: Option<String>,
    },
    /// Anonymous, correlated by a persisted session id
    AnonymousSession {
        /// Generated session id
        session_id: String,
    },
}

impl SessionIdentity {
    /// Whether this identity is authenticated
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Jwt { .. })
    }

    /// Short mode label for logs
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Jwt { .. } => "jwt",
            Self::AnonymousSession { .. } => "anonymous-session",
        }
    }

    /// Identity as a stream query parameter
    #[must_use]
    pub fn query_pair(&self) -> (&'static str, &str) {
        match self {
            Self::Jwt { token, .. } => ("token", token),
            Self::AnonymousSession { session_id } => ("sessionId", session_id),
        }
    }

    /// Identity stamped onto a REST request
    #[must_use]
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Jwt { token, .. } => request.bearer_auth(token),
            Self::AnonymousSession { session_id } => {
                request.header(SESSION_HEADER, session_id.as_str())
            }
        }
    }

    /// Cache scope: the user id for authenticated callers, none otherwise
    #[must_use]
    pub fn cache_scope(&self) -> Option<&str> {
        match self {
            Self::Jwt { user_id, .. } => user_id.as_deref(),
            Self::AnonymousSession { .. } => None,
        }
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jwt { user_id, .. } => f
                .debug_struct("Jwt")
                .field("token", &"<redacted>")
                .field("user_id", user_id)
                .finish(),
            Self::AnonymousSession { session_id } => f
                .debug_struct("AnonymousSession")
                .field("session_id", session_id)
                .finish(),
        }
    }
}

/// Single source of identity for the REST client, the stream connector and
/// the read cache
pub struct IdentityProvider {
    store: Arc<dyn KeyValueStore>,
    unauthorized: Mutex<Option<UnauthorizedCallback>>,
}

impl IdentityProvider {
    /// Create a provider over a persistent store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            unauthorized: Mutex::new(None),
        }
    }

    /// Resolve the identity for the next request
    ///
    /// An anonymous session id is generated and persisted on first use.
    #[must_use]
    pub fn current(&self) -> SessionIdentity {
        if let Some(token) = self.store.get(TOKEN_KEY).filter(|t| !t.is_empty()) {
            return SessionIdentity::Jwt {
                token,
                user_id: self.store.get(USER_ID_KEY),
            };
        }
        SessionIdentity::AnonymousSession {
            session_id: self.session_id(),
        }
    }

    /// The persisted anonymous session id, generating one if needed
    #[must_use]
    pub fn session_id(&self) -> String {
        if let Some(id) = self.store.get(SESSION_ID_KEY).filter(|id| !id.is_empty()) {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.store.set(SESSION_ID_KEY, id.clone());
        tracing::debug!(session_id = %id, "Generated anonymous session id");
        id
    }

    /// Store credentials after a successful login
    pub fn set_token(&self, token: impl Into<String>, user_id: Option<String>) {
        self.store.set(TOKEN_KEY, token.into());
        match user_id {
            Some(id) => self.store.set(USER_ID_KEY, id),
            None => self.store.remove(USER_ID_KEY),
        }
    }

    /// Forget credentials; the anonymous session id is kept
    pub fn clear_auth(&self) {
        self.store.remove(TOKEN_KEY);
        self.store.remove(USER_ID_KEY);
    }

    /// Register the logout hook, replacing any previous one
    pub fn on_unauthorized(&self, callback: impl FnOnce() + Send + 'static) {
        *self.unauthorized.lock() = Some(Box::new(callback));
    }

    /// React to a 401: clear credentials and fire the hook if one is armed
    ///
    /// The hook is consumed, so concurrent 401s fire it at most once.
    pub fn handle_unauthorized(&self) {
        self.clear_auth();
        let callback = self.unauthorized.lock().take();
        if let Some(callback) = callback {
            tracing::info!("Credentials rejected, signalling logout");
            callback();
        }
    }
}

impl fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("identity", &self.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn provider() -> (Arc<MemoryStore>, IdentityProvider) {
        let store = Arc::new(MemoryStore::new());
        let provider = IdentityProvider::new(store.clone());
        (store, provider)
    }

    #[test]
    fn test_anonymous_session_is_generated_once() {
        let (store, provider) = provider();
        let first = provider.current();
        let second = provider.current();

        assert!(!first.is_authenticated());
        assert_eq!(first, second);
        assert!(store.get(SESSION_ID_KEY).is_some());
        assert_eq!(first.cache_scope(), None);
    }

    #[test]
    fn test_token_takes_precedence() {
        let (_, provider) = provider();
        let session_id = provider.session_id();
        provider.set_token("tok", Some("u1".to_string()));

        let identity = provider.current();
        assert_eq!(identity.mode(), "jwt");
        assert_eq!(identity.query_pair(), ("token", "tok"));
        assert_eq!(identity.cache_scope(), Some("u1"));

        // Session id survives a logout
        provider.clear_auth();
        assert_eq!(
            provider.current(),
            SessionIdentity::AnonymousSession { session_id }
        );
    }

    #[test]
    fn test_query_pair_for_anonymous() {
        let (store, provider) = provider();
        store.set(SESSION_ID_KEY, "s-123".to_string());
        assert_eq!(provider.current().query_pair(), ("sessionId", "s-123"));
    }

    #[test]
    fn test_unauthorized_fires_once_and_clears_token() {
        let (store, provider) = provider();
        provider.set_token("tok", None);
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        provider.on_unauthorized(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        provider.handle_unauthorized();
        provider.handle_unauthorized();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(store.get(TOKEN_KEY).is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let identity = SessionIdentity::Jwt {
            token: "secret".to_string(),
            user_id: None,
        };
        assert!(!format!("{identity:?}").contains("secret"));
    }
}
