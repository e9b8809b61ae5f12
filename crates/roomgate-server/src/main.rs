use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use roomgate_db_memory::MemoryStore;
use roomgate_db_postgres::PostgresStore;
use roomgate_server::auth::AuthState;
use roomgate_server::config::StorageConfig;
use roomgate_server::{
    AppConfig, AppState, DisclosureBroker, ExpirySweeper, HttpAuthenticator, HttpRoomService,
    RoomgateServer, init_tracing,
};
use roomgate_storage::{GrantStore, PolicyStore};

/// Config path: first CLI argument, then `ROOMGATE_CONFIG`, then
/// `roomgate.toml` next to the binary.
fn resolve_config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROOMGATE_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("roomgate.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = if config_path.exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    init_tracing(&config.logging.level);
    tracing::info!(path = %config_path.display(), "configuration loaded");

    let (policies, grants): (Arc<dyn PolicyStore>, Arc<dyn GrantStore>) = match &config.storage {
        StorageConfig::Memory => {
            tracing::warn!("using volatile in-memory storage; grants will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
        StorageConfig::Postgres(pg) => {
            let store = Arc::new(PostgresStore::new(pg.clone()).await?);
            (store.clone(), store)
        }
    };

    let client = reqwest::Client::new();

    let rooms = Arc::new(HttpRoomService::new(
        client.clone(),
        config.rooms.base_url.clone(),
        config.rooms.access_token.clone(),
        config.rooms.notices_user.clone(),
        config.rooms.moderator_power_level,
    ));

    let broker = Arc::new(DisclosureBroker::new(
        client.clone(),
        config.yivi.disclosure_url.clone(),
        config.yivi.public_url.clone(),
        Duration::from_millis(config.yivi.request_timeout_ms),
    ));

    let auth = AuthState {
        authenticator: Arc::new(HttpAuthenticator::new(
            client,
            config.rooms.base_url.clone(),
        )),
    };

    let sweeper = ExpirySweeper::new(grants.clone(), rooms.clone());
    let sweep_interval = Duration::from_secs(config.sweeper.interval_secs);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        sweeper.run(sweep_interval, shutdown_rx).await;
    });

    let state = AppState {
        policies,
        grants,
        rooms,
        broker,
        auth,
        client_url: config.rooms.client_url.clone(),
        moderator_power_level: config.rooms.moderator_power_level,
    };

    let result = RoomgateServer::new(config.addr(), state).run().await;
    let _ = shutdown_tx.send(true);
    result
}
