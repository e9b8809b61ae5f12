//! Request handlers for the policy CRUD surface, the disclosure flow, and
//! the narrow provider proxy.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use roomgate_core::{Admission, ExpiryStatus, SecuredRoom, ValidationError, decide};

use crate::auth::{AuthenticatedCaller, require_admin, require_admin_or_moderator};
use crate::epoch_now;
use crate::error::ApiError;
use crate::rooms::Membership;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct RoomIdQuery {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionalRoomIdQuery {
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub session_token: String,
    pub room_id: String,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

// ---- Policy CRUD ----

/// `GET /secured-rooms`: admins get every policy; a moderator of one room
/// may fetch that room's policy via `?room_id=`.
pub async fn list_policies(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Query(query): Query<OptionalRoomIdQuery>,
) -> Result<Response, ApiError> {
    match query.room_id {
        Some(room_id) => {
            require_admin_or_moderator(
                &caller,
                state.rooms.as_ref(),
                &room_id,
                state.moderator_power_level,
            )
            .await?;
            let policy = state.policies.get(&room_id).await?.ok_or(ApiError::NotFound)?;
            Ok(Json(policy).into_response())
        }
        None => {
            require_admin(&caller)?;
            let policies = state.policies.list().await?;
            Ok(Json(policies).into_response())
        }
    }
}

/// `POST /secured-rooms`: admin only. Creates the backing room first, then
/// persists the policy under the assigned room id.
pub async fn create_policy(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    require_admin(&caller)?;

    let mut policy = SecuredRoom::parse(&payload)?;
    if policy.room_id.is_some() {
        return Err(ApiError::Validation(ValidationError {
            errors: vec!["'room_id' cannot be supplied when creating a room".into()],
        }));
    }

    let room_id = state
        .rooms
        .create_room(&policy.name, &policy.topic, policy.room_type)
        .await?;
    policy.room_id = Some(room_id.clone());
    state.policies.create(&policy).await?;

    info!(room_id = %room_id, "created secured room");
    Ok(Json(policy).into_response())
}

/// `PUT /secured-rooms`: admin or moderator of the room. `room_type` is
/// immutable after creation.
pub async fn update_policy(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    let updated = SecuredRoom::parse(&payload)?;
    let Some(room_id) = updated.room_id.clone() else {
        return Err(ApiError::Validation(ValidationError {
            errors: vec!["'room_id' is required when updating a room".into()],
        }));
    };

    require_admin_or_moderator(
        &caller,
        state.rooms.as_ref(),
        &room_id,
        state.moderator_power_level,
    )
    .await?;

    let current = state.policies.get(&room_id).await?.ok_or(ApiError::NotFound)?;
    if current.room_type != updated.room_type {
        return Err(ApiError::ImmutableFieldViolation);
    }

    // The backing room may have disappeared underneath a stale policy.
    if !state.rooms.room_exists(&room_id).await? {
        return Err(ApiError::NotFound);
    }

    if current.name != updated.name {
        state.rooms.update_room_name(&room_id, &updated.name).await?;
    }
    if current.topic != updated.topic {
        state.rooms.update_room_topic(&room_id, &updated.topic).await?;
    }
    state.policies.update(&updated).await?;

    info!(room_id = %room_id, "updated secured room");
    Ok(Json(json!({"modified": room_id})).into_response())
}

/// `DELETE /secured-rooms?room_id=`: admin only. Shuts the room down
/// (blocking) before removing the policy. Grants of the room are left for
/// lazy cleanup.
pub async fn delete_policy(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Query(query): Query<RoomIdQuery>,
) -> Result<Response, ApiError> {
    require_admin(&caller)?;

    let current = state
        .policies
        .get(&query.room_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let room_id = current.room_id.as_deref().unwrap_or(&query.room_id);

    state.rooms.shutdown_room(room_id).await?;
    state.policies.delete(room_id).await?;

    info!(room_id = %room_id, "deleted secured room");
    Ok(Json(json!({"deleted": room_id})).into_response())
}

// ---- Grant management ----

#[derive(Debug, Serialize)]
struct ExpirationEntry {
    room_id: String,
    join_time: i64,
    expired: bool,
    status: &'static str,
    days_left: f64,
}

/// `GET /secured-rooms/expirations`: the caller's grants and where each
/// stands relative to its policy's TTL. Grants whose policy was deleted are
/// reported as orphaned so the client can offer a dismiss.
pub async fn list_expirations(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Response, ApiError> {
    let now = epoch_now();
    let mut entries = Vec::new();

    for grant in state.grants.list_for_user(&caller.user_id).await? {
        let policy = state.policies.get(&grant.room_id).await?;
        let (status, days_left) = match &policy {
            None => ("orphaned", 0.0),
            Some(_) if grant.expired => ("expired", 0.0),
            Some(policy) => {
                match ExpiryStatus::of(grant.join_time, now, policy.expiration_time_days) {
                    ExpiryStatus::Active { days_left } => ("active", days_left),
                    ExpiryStatus::Warning { days_left } => ("warning", days_left),
                    ExpiryStatus::Expired => ("expired", 0.0),
                }
            }
        };
        entries.push(ExpirationEntry {
            room_id: grant.room_id,
            join_time: grant.join_time,
            expired: grant.expired,
            status,
            days_left,
        });
    }

    Ok(Json(entries).into_response())
}

/// `POST /secured-rooms/expirations/dismiss?room_id=`: the caller
/// acknowledges an expiry notice; removes their grant row without touching
/// room membership.
pub async fn dismiss_expiration(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Query(query): Query<RoomIdQuery>,
) -> Result<Response, ApiError> {
    state.grants.dismiss(&query.room_id, &caller.user_id).await?;
    Ok(Json(json!({"dismissed": query.room_id})).into_response())
}

/// `DELETE /secured-rooms/grants?room_id=`: admin mass evict. Flags every
/// grant of the room; the sweeper's next cycle removes the memberships.
pub async fn purge_grants(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Query(query): Query<RoomIdQuery>,
) -> Result<Response, ApiError> {
    require_admin(&caller)?;
    state.grants.remove_all(&query.room_id).await?;
    info!(room_id = %query.room_id, "flagged all grants of room for eviction");
    Ok(Json(json!({"expired": query.room_id})).into_response())
}

// ---- Disclosure flow ----

/// `GET /yivi/start?room_id=`: starts a disclosure session for the room's
/// policy. 403 when the room is not secured.
pub async fn yivi_start(
    State(state): State<AppState>,
    AuthenticatedCaller(_caller): AuthenticatedCaller,
    Query(query): Query<RoomIdQuery>,
) -> Result<Response, ApiError> {
    let policy = state
        .policies
        .get(&query.room_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("room is not secured".into()))?;

    let answer = state.broker.start_session(&policy).await?;
    Ok(Json(answer).into_response())
}

/// `GET|POST /yivi/result?session_token=&room_id=`: fetches the verdict and
/// decides admission. A verdict that fails the policy is a 200
/// `{"not_correct"}`, not an error.
pub async fn yivi_result(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Query(query): Query<ResultQuery>,
) -> Result<Response, ApiError> {
    let policy = state
        .policies
        .get(&query.room_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("room is not secured".into()))?;

    let verdict = state.broker.fetch_result(&query.session_token).await?;

    match decide(&verdict, &policy) {
        Admission::Allowed(revealed) => {
            state
                .grants
                .allow(&caller.user_id, &query.room_id, epoch_now())
                .await?;
            state
                .rooms
                .set_membership(&caller.user_id, &query.room_id, Membership::Join)
                .await?;

            // Audit trail: announce the admission and any profile attributes
            // in the room itself. Best effort; admission stands regardless.
            if let Err(err) = state
                .rooms
                .send_notice(&query.room_id, &admission_notice(&caller.user_id, &revealed))
                .await
            {
                warn!(room_id = %query.room_id, error = %err, "could not post admission notice");
            }

            info!(room_id = %query.room_id, user_id = %caller.user_id, "admitted user");
            Ok(Json(json!({
                "goto": format!("{}#/room/{}", state.client_url, query.room_id),
            }))
            .into_response())
        }
        Admission::Denied => Ok(Json(json!({
            "not_correct": "unfortunately not allowed in the room",
        }))
        .into_response()),
    }
}

fn admission_notice(
    user_id: &str,
    revealed: &std::collections::BTreeMap<String, String>,
) -> String {
    let mut shown: Vec<String> = revealed
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(id, value)| format!("{id}: {value}"))
        .collect();
    if shown.is_empty() {
        format!("{user_id} joined after disclosing the required attributes")
    } else {
        shown.sort();
        format!("{user_id} joined, disclosing {}", shown.join(", "))
    }
}

// ---- Provider proxy ----

/// `ANY /yivi-proxy/{token}`: the bare session path.
pub async fn yivi_proxy_bare(
    State(state): State<AppState>,
    method: Method,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    proxy_inner(&state, method, token, String::new(), body).await
}

/// `ANY /yivi-proxy/{token}/{*path}`: allow-listed session sub-paths.
pub async fn yivi_proxy_subpath(
    State(state): State<AppState>,
    method: Method,
    Path((token, path)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    proxy_inner(&state, method, token, path, body).await
}

async fn proxy_inner(
    state: &AppState,
    method: Method,
    token: String,
    path: String,
    body: Bytes,
) -> Result<Response, ApiError> {
    if path == "frontend/statusevents" {
        return state.broker.stream_status(&token).await;
    }

    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| ApiError::InvalidSessionToken)?;
    state.broker.proxy(&token, &path, method, body).await
}
