//! JWT validation of bearer tokens (HS256 shared secret).
//!
//! The gateway never mints tokens; it only verifies what the authentication
//! collaborator issued and extracts the `sub`/`role` claims.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::ports::auth::{AuthError, AuthUser, TokenValidator};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    #[serde(default)]
    pub role: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub iss: String,
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(AuthUser {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    fn mint(secret: &str, sub: &str, role: &str, exp_offset_secs: i64, iss: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp: now + exp_offset_secs,
            iat: now,
            iss: iss.to_string(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_resolves_user() {
        let validator = JwtValidator::new("secret", None);
        let token = mint("secret", "user-1", "admin", 3600, "gantry");

        let user = validator.validate_token(&token).await.unwrap();
        assert_eq!(user.id, "user-1");
        assert!(user.is_admin());
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let validator = JwtValidator::new("secret", None);
        let token = mint("secret", "user-1", "user", -3600, "gantry");

        let err = validator.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let validator = JwtValidator::new("secret", None);
        let token = mint("other-secret", "user-1", "user", 3600, "gantry");

        assert!(validator.validate_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_issuer_mismatch_is_rejected() {
        let validator = JwtValidator::new("secret", Some("gantry"));
        let token = mint("secret", "user-1", "user", 3600, "someone-else");

        assert!(validator.validate_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let validator = JwtValidator::new("secret", None);
        assert!(validator.validate_token("not-a-jwt").await.is_err());
    }
}
