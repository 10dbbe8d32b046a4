use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::warn;
use uuid::Uuid;

use rally_types::api::Claims;

use crate::error::AuthError;
use crate::store::Directory;

/// A verified user behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Verifies connection credentials (HS256 JWT) and resolves them against the
/// directory. Runs before the WebSocket upgrade, so a rejection leaves no state.
pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    directory: Arc<dyn Directory>,
}

impl Authenticator {
    pub fn new(secret: &str, directory: Arc<dyn Directory>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            directory,
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?
            .claims;

        // The token may outlive the account.
        let Some(display_name) = self.directory.display_name(claims.sub).await? else {
            warn!("Valid token for unknown user {}", claims.sub);
            return Err(AuthError::UnknownIdentity);
        };

        Ok(Identity {
            user_id: claims.sub,
            display_name,
        })
    }
}

/// Issue a credential. Used by the REST layer at login and by tests.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    name: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
