use jsonwebtoken::DecodingKey;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::services::auth_service::validate_jwt;

/// Who is behind a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("malformed credential header: {0}")]
    MalformedHeader(&'static str),
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token does not contain a 'sub' claim")]
    MissingSubject,
    #[error("token verification is not configured")]
    NotConfigured,
}

/// Turns an opaque credential into an identity.
///
/// Called once per connection attempt, before any room state is touched.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Verifies HS256 access tokens.
///
/// The `sub` claim (string or number) is the user id. The display name is
/// taken from `username`, then `name`, then falls back to `User <sub>`.
pub struct JwtVerifier {
    key: Option<DecodingKey>,
}

impl JwtVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;
        let token_data = validate_jwt(credential, key)?;
        let claims = token_data.claims;

        let user_id = match claims.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            Some(Value::Number(sub)) => sub.to_string(),
            _ => return Err(AuthError::MissingSubject),
        };
        let display_name = ["username", "name"]
            .iter()
            .find_map(|claim| claims.get(*claim).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("User {}", user_id));

        debug!(user_id = %user_id, "Token verified");
        Ok(Identity { user_id, display_name })
    }
}
