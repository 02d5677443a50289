//! Request authentication.
//!
//! An [`Authenticator`] reads the `Authorization` header and reports an
//! [`AuthInfo`]. The bearer back-end validates tokens against SHA-256 hashes
//! stored in configuration, so plaintext tokens never live on disk.

use crate::config::AuthConfig;
use crate::error::ServerError;
use kwikapi_core::AuthInfo;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Pluggable authentication back-end.
pub trait Authenticator: Send + Sync {
    /// Lower-case scheme name expected in the `Authorization` header.
    fn scheme(&self) -> &str;

    /// Checks the credentials that follow the scheme.
    ///
    /// Unknown credentials produce an unauthenticated [`AuthInfo`]; only a
    /// malformed header is an error.
    fn verify(&self, credentials: &str) -> AuthInfo;

    /// Authenticates from the raw `Authorization` header value.
    ///
    /// A missing header is anonymous. A header naming another scheme fails
    /// with `AuthenticationError`.
    fn authenticate(&self, header: Option<&str>) -> Result<AuthInfo, ServerError> {
        let Some(header) = header else {
            return Ok(AuthInfo::anonymous());
        };
        let header = header.trim();
        let (scheme, credentials) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case(self.scheme()) {
            return Err(ServerError::AuthFailed(scheme.to_string()));
        }
        Ok(self.verify(credentials.trim()))
    }
}

/// Validates bearer tokens against pre-configured hashes.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    /// Set of valid token hashes (SHA-256 hex strings).
    valid_hashes: HashSet<String>,
}

impl TokenValidator {
    /// Creates a new validator with the given token hashes.
    pub fn new(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            valid_hashes: hashes
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns whether any tokens are configured.
    pub fn has_tokens(&self) -> bool {
        !self.valid_hashes.is_empty()
    }

    /// Returns the number of configured tokens.
    pub fn token_count(&self) -> usize {
        self.valid_hashes.len()
    }

    /// Validates a plaintext token by hashing and comparing.
    pub fn validate(&self, token: &str) -> bool {
        if self.valid_hashes.is_empty() {
            return false;
        }
        self.valid_hashes.contains(&Self::hash_token(token))
    }

    /// Hashes a token using SHA-256, returning a lowercase hex string.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// `Authorization: Bearer <token>` back-end.
#[derive(Debug, Clone)]
pub struct BearerAuthenticator {
    validator: TokenValidator,
}

impl BearerAuthenticator {
    pub fn new(validator: TokenValidator) -> Self {
        Self { validator }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(TokenValidator::new(config.token_hashes.iter().cloned()))
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }
}

impl Authenticator for BearerAuthenticator {
    fn scheme(&self) -> &str {
        "bearer"
    }

    fn verify(&self, credentials: &str) -> AuthInfo {
        if credentials.is_empty() || !self.validator.validate(credentials) {
            tracing::debug!("Bearer token rejected");
            return AuthInfo {
                scheme: Some(self.scheme().to_string()),
                ..AuthInfo::anonymous()
            };
        }
        // The principal is a short fingerprint; the token itself is never kept.
        let hash = TokenValidator::hash_token(credentials);
        AuthInfo::authenticated(self.scheme(), Some(hash[..12].to_string()))
    }
}
