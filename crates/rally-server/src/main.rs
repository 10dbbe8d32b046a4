use std::sync::Arc;

use tracing::info;

use rally_gateway::{Backends, Dispatcher, SqliteStore};

mod config;
mod routes;

use config::ServerConfig;
use routes::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rally=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting with {:?}", config);

    // Init database
    let db = Arc::new(rally_db::Database::open(&config.db_path)?);
    let store = Arc::new(SqliteStore::new(db));

    let dispatcher = Dispatcher::new(
        config.gateway.clone(),
        &config.jwt_secret,
        Backends {
            directory: store.clone(),
            oracle: store.clone(),
            store,
        },
    );

    if config.internal_key.is_none() {
        info!("RALLY_INTERNAL_KEY not set; internal routes disabled");
    }

    let app = routes::router(ServerState {
        dispatcher,
        internal_key: config.internal_key.as_deref().map(Arc::from),
    });

    let addr = config.addr()?;
    info!("Rally server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
