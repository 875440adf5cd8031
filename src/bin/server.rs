//! catalogsync Server
//!
//! Accepts multipart changesets, applies them to stored trees, and returns
//! the canonical result.
//!
//! See [`catalogsync::server::config`] for configuration and
//! [`catalogsync::server`] for the endpoints.

use catalogsync::server::{router, ApiKeyStore, AppState, Config, ServerStorage};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "catalogsync_server=info,catalogsync=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    std::fs::create_dir_all(&config.data_dir)?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let state = AppState::new(
        ServerStorage::new(&config.data_dir),
        ApiKeyStore::load(&config.config_path),
    );
    let app = router(state, config.max_body_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
