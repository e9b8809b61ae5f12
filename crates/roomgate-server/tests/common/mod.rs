//! Shared test doubles: a token-table authenticator and a recording room
//! service, plus a helper that serves the app on an ephemeral port.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::request::Parts;
use tokio::task::JoinHandle;

use roomgate_core::SecuredRoomType;
use roomgate_db_memory::MemoryStore;
use roomgate_server::auth::AuthState;
use roomgate_server::{
    ApiError, AppState, Authenticator, Caller, DisclosureBroker, Membership, RoomService,
    build_app,
};

pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";
pub const MOD_TOKEN: &str = "mod-token";

pub const ADMIN_ID: &str = "@admin:hub";
pub const USER_ID: &str = "@alice:hub";
pub const MOD_ID: &str = "@mod:hub";

pub const MODERATOR_LEVEL: i64 = 50;

/// Resolves a fixed table of bearer tokens.
pub struct TableAuthenticator;

#[async_trait]
impl Authenticator for TableAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Caller, ApiError> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthenticated)?;

        match token {
            ADMIN_TOKEN => Ok(Caller {
                user_id: ADMIN_ID.into(),
                is_admin: true,
            }),
            USER_TOKEN => Ok(Caller {
                user_id: USER_ID.into(),
                is_admin: false,
            }),
            MOD_TOKEN => Ok(Caller {
                user_id: MOD_ID.into(),
                is_admin: false,
            }),
            _ => Err(ApiError::Unauthenticated),
        }
    }
}

/// Records every call; membership changes can be made to fail on demand.
#[derive(Default)]
pub struct RecordingRoomService {
    pub calls: Mutex<Vec<String>>,
    pub power_levels: Mutex<HashMap<(String, String), i64>>,
    pub fail_membership: AtomicBool,
    missing_rooms: Mutex<HashSet<String>>,
    next_room: AtomicUsize,
}

impl RecordingRoomService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn grant_power_level(&self, user_id: &str, room_id: &str, level: i64) {
        self.power_levels
            .lock()
            .unwrap()
            .insert((user_id.to_owned(), room_id.to_owned()), level);
    }

    /// Makes `room_exists` answer false for one room.
    pub fn mark_room_missing(&self, room_id: &str) {
        self.missing_rooms.lock().unwrap().insert(room_id.to_owned());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RoomService for RecordingRoomService {
    async fn create_room(
        &self,
        name: &str,
        _topic: &str,
        _room_type: SecuredRoomType,
    ) -> Result<String, ApiError> {
        let n = self.next_room.fetch_add(1, Ordering::SeqCst);
        let room_id = format!("!room{n}:hub");
        self.record(format!("create {room_id} {name}"));
        Ok(room_id)
    }

    async fn room_exists(&self, room_id: &str) -> Result<bool, ApiError> {
        Ok(!self.missing_rooms.lock().unwrap().contains(room_id))
    }

    async fn update_room_name(&self, room_id: &str, name: &str) -> Result<(), ApiError> {
        self.record(format!("rename {room_id} {name}"));
        Ok(())
    }

    async fn update_room_topic(&self, room_id: &str, topic: &str) -> Result<(), ApiError> {
        self.record(format!("retopic {room_id} {topic}"));
        Ok(())
    }

    async fn shutdown_room(&self, room_id: &str) -> Result<(), ApiError> {
        self.record(format!("shutdown {room_id}"));
        Ok(())
    }

    async fn set_membership(
        &self,
        user_id: &str,
        room_id: &str,
        membership: Membership,
    ) -> Result<(), ApiError> {
        if self.fail_membership.load(Ordering::SeqCst) {
            return Err(ApiError::Internal("room service down".into()));
        }
        self.record(format!("{} {user_id} {room_id}", membership.as_str()));
        Ok(())
    }

    async fn power_level(&self, user_id: &str, room_id: &str) -> Result<i64, ApiError> {
        Ok(*self
            .power_levels
            .lock()
            .unwrap()
            .get(&(user_id.to_owned(), room_id.to_owned()))
            .unwrap_or(&0))
    }

    async fn send_notice(&self, room_id: &str, body: &str) -> Result<(), ApiError> {
        self.record(format!("notice {room_id} {body}"));
        Ok(())
    }
}

pub struct TestServer {
    pub base: String,
    pub store: Arc<MemoryStore>,
    pub rooms: Arc<RecordingRoomService>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serves the app on an ephemeral port, backed by in-memory storage and
    /// a disclosure provider at `provider_url`.
    pub async fn start(provider_url: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(RecordingRoomService::new());

        let broker = Arc::new(DisclosureBroker::new(
            reqwest::Client::new(),
            provider_url,
            "http://public.example",
            Duration::from_millis(500),
        ));

        let state = AppState {
            policies: store.clone(),
            grants: store.clone(),
            rooms: rooms.clone(),
            broker,
            auth: AuthState {
                authenticator: Arc::new(TableAuthenticator),
            },
            client_url: "http://client.example".into(),
            moderator_power_level: MODERATOR_LEVEL,
        };

        let app = build_app(state);
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            base: format!("http://{addr}"),
            store,
            rooms,
            shutdown: Some(tx),
            handle,
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}
