use async_trait::async_trait;
use thiserror::Error;

/// The identity resolved from a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: String,
}

impl AuthUser {
    /// Whether this user carries the administrative role.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Errors surfaced by token validation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    /// The token is malformed, expired or its signature does not verify.
    #[error("invalid or expired token")]
    InvalidToken,

    /// The validator itself failed (key material, configuration).
    #[error("token validation failed: {0}")]
    Validation(String),
}

/// TokenValidator defines the port over the authentication collaborator.
///
/// The gateway treats validation as a pure function of the token string:
/// no session state, no side effects.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token and resolve the user it represents.
    async fn validate_token(&self, token: &str) -> Result<AuthUser, AuthError>;
}
