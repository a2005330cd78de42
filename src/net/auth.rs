//! Pluggable token validation
//!
//! The engine only needs a session identifier or a rejection; real providers
//! (OAuth) are wired in by the embedder. Validation runs synchronously on the
//! connection's read task.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{AuthMode, ConfigError, ServerConfig};

/// Errors a provider can reject a token with. The reason string is sent back
/// in the `AuthResponse`; the connection closes after flush.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("empty token")]
    EmptyToken,
    #[error("token rejected: {0}")]
    Rejected(String),
}

pub trait AuthProvider: Send + Sync {
    /// Validate an opaque token, returning the session id to register
    fn validate(&self, token: &str, client_version: &str) -> Result<String, AuthError>;
}

/// Accepts any token and mints a fresh session id
pub struct DisabledAuth;

impl AuthProvider for DisabledAuth {
    fn validate(&self, _token: &str, _client_version: &str) -> Result<String, AuthError> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Accepts any non-empty token; the session id is a prefixed digest of the
/// token, so the same token maps to the same session id.
pub struct StubAuth {
    prefix: String,
}

impl StubAuth {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl AuthProvider for StubAuth {
    fn validate(&self, token: &str, _client_version: &str) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        let digest = Sha256::digest(token.as_bytes());
        let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Ok(format!("{}-{}", self.prefix, hash))
    }
}

/// Build the provider selected by the configuration
pub fn provider_from_config(config: &ServerConfig) -> Result<Arc<dyn AuthProvider>, ConfigError> {
    match config.auth_mode {
        AuthMode::Disabled => Ok(Arc::new(DisabledAuth)),
        AuthMode::Stub => Ok(Arc::new(StubAuth::new(config.auth_stub_prefix.clone()))),
        AuthMode::Oauth => Err(ConfigError::Invalid(
            "auth_mode 'oauth' requires an externally wired provider",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_accepts_non_empty_token() {
        let auth = StubAuth::new("tk");
        let id = auth.validate("secret", "1.0").unwrap();
        assert!(id.starts_with("tk-"));
        // prefix + '-' + 8 digest bytes in hex
        assert_eq!(id.len(), 2 + 1 + 16);
    }

    #[test]
    fn test_stub_is_deterministic() {
        let auth = StubAuth::new("tk");
        let a = auth.validate("secret", "1.0").unwrap();
        let b = auth.validate("secret", "2.0").unwrap();
        assert_eq!(a, b);

        let c = auth.validate("other", "1.0").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_stub_rejects_empty_token() {
        let auth = StubAuth::new("tk");
        assert_eq!(auth.validate("", "1.0"), Err(AuthError::EmptyToken));
    }

    #[test]
    fn test_disabled_mints_unique_ids() {
        let auth = DisabledAuth;
        let a = auth.validate("", "1.0").unwrap();
        let b = auth.validate("", "1.0").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_provider_from_config() {
        let config = ServerConfig::default();
        assert!(provider_from_config(&config).is_ok());

        let config = ServerConfig {
            auth_mode: AuthMode::Oauth,
            ..Default::default()
        };
        assert!(provider_from_config(&config).is_err());
    }
}
