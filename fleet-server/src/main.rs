use std::sync::Arc;

use tracing::info;

use fleet_server::api;
use fleet_server::config::AppConfig;
use fleet_server::response::ServerResult;
use fleet_server::storage::memory::MemoryStorage;
use fleet_server::util::app_state::AppState;
use fleet_server::util::logging::init_tracing;

#[tokio::main]
async fn main() -> ServerResult<()> {
    init_tracing();
    info!("Starting fleet server");

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load config: {:?}", e);
        std::process::exit(1);
    });

    let storage = MemoryStorage::new();
    let state = AppState::new(storage, Arc::new(config));

    if let Err(e) = api::serve::serve(state).await {
        tracing::error!("Server exited: {:?}", e);
    }
    Ok(())
}
