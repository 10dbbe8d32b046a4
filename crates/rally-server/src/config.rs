use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use rally_gateway::GatewayConfig;
use rally_gateway::config::{DEFAULT_HISTORY_MAX_LIMIT, DEFAULT_MAX_MESSAGE_LENGTH};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read from `RALLY_*` environment variables.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Shared secret for `/internal/*`. Routes are not mounted without it.
    pub internal_key: Option<String>,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = match lookup("RALLY_JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("RALLY_JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let port = var("RALLY_PORT", "3000")
            .parse()
            .context("RALLY_PORT must be a port number")?;

        let max_message_length: usize = var("RALLY_MAX_MESSAGE_LENGTH", &DEFAULT_MAX_MESSAGE_LENGTH.to_string())
            .parse()
            .context("RALLY_MAX_MESSAGE_LENGTH must be a positive integer")?;
        anyhow::ensure!(max_message_length > 0, "RALLY_MAX_MESSAGE_LENGTH must be a positive integer");

        let history_max_limit: u32 = var("RALLY_HISTORY_MAX_LIMIT", &DEFAULT_HISTORY_MAX_LIMIT.to_string())
            .parse()
            .context("RALLY_HISTORY_MAX_LIMIT must be a positive integer")?;
        anyhow::ensure!(history_max_limit > 0, "RALLY_HISTORY_MAX_LIMIT must be a positive integer");

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            max_message_length,
            history_default_limit: defaults.history_default_limit.min(history_max_limit),
            history_max_limit,
        };

        Ok(Self {
            host: var("RALLY_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("RALLY_DB_PATH", "rally.db")),
            jwt_secret,
            internal_key: lookup("RALLY_INTERNAL_KEY").filter(|k| !k.is_empty()),
            gateway,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"<redacted>")
            .field("internal_key", &self.internal_key.as_ref().map(|_| "<redacted>"))
            .field("gateway", &self.gateway)
            .finish()
    }
}
