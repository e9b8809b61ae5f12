//! Caller identity and the authorization guard.
//!
//! Identity resolution is delegated to an external [`Authenticator`]; this
//! module only decides what a resolved caller may do. Policy mutation is
//! admin-gated, except updating an existing policy, which a moderator of
//! that specific room may also do.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::rooms::RoomService;

/// A resolved caller identity.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    /// Global admin flag; distinct from per-room moderator power.
    pub is_admin: bool,
}

/// Resolves an opaque caller identity from a request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// Returns `ApiError::Unauthenticated` when the request carries no
    /// resolvable identity.
    async fn authenticate(&self, parts: &Parts) -> Result<Caller, ApiError>;
}

/// State required by the [`AuthenticatedCaller`] extractor.
#[derive(Clone)]
pub struct AuthState {
    pub authenticator: Arc<dyn Authenticator>,
}

/// Axum extractor that resolves the caller before the handler runs.
///
/// Rejection is `ApiError::Unauthenticated` (401).
pub struct AuthenticatedCaller(pub Caller);

impl<S> FromRequestParts<S> for AuthenticatedCaller
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let caller = auth_state.authenticator.authenticate(parts).await?;
        Ok(AuthenticatedCaller(caller))
    }
}

/// Admin-only operations (create/delete policies, mass evictions).
pub fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "only hub admins can access this resource".into(),
        ))
    }
}

/// Operations open to admins and to moderators of the specific room, where
/// moderator means the caller's power level in that room equals the
/// configured moderator level.
pub async fn require_admin_or_moderator(
    caller: &Caller,
    rooms: &dyn RoomService,
    room_id: &str,
    moderator_power_level: i64,
) -> Result<(), ApiError> {
    if caller.is_admin {
        return Ok(());
    }

    let power_level = rooms.power_level(&caller.user_id, room_id).await?;
    if power_level == moderator_power_level {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "you need appropriate permissions to access this resource".into(),
        ))
    }
}

/// Authenticator that asks the chat backend who the bearer token belongs to.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
    #[serde(default)]
    admin: bool,
}

impl HttpAuthenticator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn bearer_token(parts: &Parts) -> Option<&str> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Caller, ApiError> {
        let token = Self::bearer_token(parts).ok_or(ApiError::Unauthenticated)?;

        let response = self
            .client
            .get(format!("{}/whoami", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|_| ApiError::Unauthenticated)?;

        if !response.status().is_success() {
            return Err(ApiError::Unauthenticated);
        }

        let whoami: WhoamiResponse = response
            .json()
            .await
            .map_err(|_| ApiError::Unauthenticated)?;

        Ok(Caller {
            user_id: whoami.user_id,
            is_admin: whoami.admin,
        })
    }
}
