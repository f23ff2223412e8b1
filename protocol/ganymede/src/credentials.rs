//! OAuth token storage.

use grpc::TokenSource;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The two tokens a registered device holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    /// Key the token is persisted under.
    pub fn key(self) -> &'static str {
        match self {
            TokenKind::AccessToken => "access-token",
            TokenKind::RefreshToken => "refresh-token",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value for {0} is not valid UTF-8")]
    Encoding(String),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
}

/// Durable home of the device's tokens.
pub trait CredentialStore: Send + Sync {
    fn read(&self, kind: TokenKind) -> Result<Option<String>, StoreError>;

    fn write(&self, kind: TokenKind, token: &str) -> Result<(), StoreError>;
}

/// Adapts any credential store into the bearer token for gRPC calls.
pub struct Bearer<S: ?Sized>(pub std::sync::Arc<S>);

impl<S: CredentialStore + ?Sized> TokenSource for Bearer<S> {
    fn bearer(&self) -> Option<String> {
        match self.0.read(TokenKind::AccessToken) {
            Ok(Some(token)) if !token.is_empty() => Some(format!("Bearer {token}")),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read access token");
                None
            }
        }
    }
}

/// Tokens held in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<TokenKind, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: &str, refresh: Option<&str>) -> Self {
        let store = Self::new();
        {
            let mut tokens = store.tokens.lock();
            tokens.insert(TokenKind::AccessToken, access.to_string());
            if let Some(refresh) = refresh {
                tokens.insert(TokenKind::RefreshToken, refresh.to_string());
            }
        }
        store
    }
}

impl CredentialStore for MemoryStore {
    fn read(&self, kind: TokenKind) -> Result<Option<String>, StoreError> {
        Ok(self.tokens.lock().get(&kind).cloned())
    }

    fn write(&self, kind: TokenKind, token: &str) -> Result<(), StoreError> {
        self.tokens.lock().insert(kind, token.to_string());
        Ok(())
    }
}
