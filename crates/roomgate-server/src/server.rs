//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    routing::{any, delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use roomgate_storage::{GrantStore, PolicyStore};

use crate::auth::AuthState;
use crate::broker::DisclosureBroker;
use crate::handlers;
use crate::rooms::RoomService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub policies: Arc<dyn PolicyStore>,
    pub grants: Arc<dyn GrantStore>,
    pub rooms: Arc<dyn RoomService>,
    pub broker: Arc<DisclosureBroker>,
    pub auth: AuthState,
    /// Base URL of the chat client, used in post-admission `goto` links.
    pub client_url: String,
    pub moderator_power_level: i64,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        // Policy CRUD
        .route(
            "/secured-rooms",
            get(handlers::list_policies)
                .post(handlers::create_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        // Grant management
        .route(
            "/secured-rooms/expirations",
            get(handlers::list_expirations),
        )
        .route(
            "/secured-rooms/expirations/dismiss",
            post(handlers::dismiss_expiration),
        )
        .route("/secured-rooms/grants", delete(handlers::purge_grants))
        // Disclosure flow
        .route("/yivi/start", get(handlers::yivi_start))
        .route(
            "/yivi/result",
            get(handlers::yivi_result).post(handlers::yivi_result),
        )
        // Provider proxy; every method, the broker rejects what it must
        .route("/yivi-proxy/{token}", any(handlers::yivi_proxy_bare))
        .route(
            "/yivi-proxy/{token}/{*path}",
            any(handlers::yivi_proxy_subpath),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct RoomgateServer {
    addr: SocketAddr,
    app: Router,
}

impl RoomgateServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: build_app(state),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
