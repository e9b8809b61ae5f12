//! HTTP server for attribute-gated room admission.
//!
//! Ties the domain model and a storage backend to the outside world: the
//! policy CRUD surface, the proxied Yivi disclosure flow, the authorization
//! guard, and the background expiry sweeper.

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod rooms;
pub mod server;
pub mod sweeper;

pub use auth::{Authenticator, Caller, HttpAuthenticator};
pub use broker::DisclosureBroker;
pub use config::AppConfig;
pub use error::ApiError;
pub use observability::init_tracing;
pub use rooms::{HttpRoomService, Membership, RoomService};
pub use server::{AppState, RoomgateServer, build_app};
pub use sweeper::ExpirySweeper;

/// Current wall-clock time as unix epoch seconds.
pub(crate) fn epoch_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
