//! Real-time chat gateway for event attendees.
//!
//! Connections authenticate once at upgrade, then exchange JSON frames
//! (`{"type": ..., "data": ...}`) with the [`Dispatcher`], which owns the
//! session registry, event channel membership and the message pipeline.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod membership;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod store;
pub mod validate;

#[cfg(test)]
mod testing;

pub use auth::{Authenticator, Identity, issue_token};
pub use config::GatewayConfig;
pub use connection::handle_connection;
pub use dispatcher::{Backends, Dispatcher};
pub use error::{AuthError, GatewayError, StoreError};
pub use store::{AccessOracle, Directory, MessageStore, SqliteStore};
