//! Gateway error taxonomy.
//!
//! Every command failure is converted at the operation boundary into a scoped
//! `error` event for the originating connection. Store details are logged
//! server-side and never reach the client.

use thiserror::Error;

/// Credential rejection reasons. Any of these refuses the connection before
/// any state is created.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    Missing,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("identity no longer exists")]
    UnknownIdentity,

    #[error("identity lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Failures of the external store (messages, directory, access records).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Join or history denied; the connection stays usable.
    #[error("{0}")]
    Authorization(String),

    /// Malformed payload; no state change.
    #[error("{0}")]
    Validation(String),

    /// Store failure; never partially applied.
    #[error("{0}")]
    Persistence(String),
}

impl GatewayError {
    pub fn access_denied() -> Self {
        Self::Authorization("Access denied to this event".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Text sent back to the client in the `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication(_) => "Authentication failed".into(),
            Self::Authorization(m) | Self::Validation(m) | Self::Persistence(m) => m.clone(),
        }
    }

    /// Static label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Authorization(_) => "authorization",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        tracing::error!("store failure: {}", err);
        Self::Persistence("Service temporarily unavailable".into())
    }
}
