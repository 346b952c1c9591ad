use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_server::api;
use parley_server::config::ServerConfig;
use parley_server::state::AppState;
use parley_server::store::Store;
use parley_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley chat server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        "Loaded configuration"
    );

    let database = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database opened");
    }
    let state = AppState::new(&config, Store::new(database));

    tokio::select! {
        result = api::serve(&config, state) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
