//! Narrow interface to the external Room Service.
//!
//! The chat backend owns rooms, membership and message delivery; this core
//! only asks it to materialize rooms for new policies, to move users in and
//! out, and to post audit notices.

use async_trait::async_trait;
use roomgate_core::SecuredRoomType;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Leave,
}

impl Membership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// Everything this core needs from the chat backend.
#[async_trait]
pub trait RoomService: Send + Sync {
    /// Materializes the room backing a new policy: public visibility, with
    /// the notices principal granted an elevated power level. Returns the
    /// assigned room id.
    async fn create_room(
        &self,
        name: &str,
        topic: &str,
        room_type: SecuredRoomType,
    ) -> Result<String, ApiError>;

    /// True when the room id is known to the backend.
    async fn room_exists(&self, room_id: &str) -> Result<bool, ApiError>;

    async fn update_room_name(&self, room_id: &str, name: &str) -> Result<(), ApiError>;

    async fn update_room_topic(&self, room_id: &str, topic: &str) -> Result<(), ApiError>;

    /// Shuts the room down; blocks until complete.
    async fn shutdown_room(&self, room_id: &str) -> Result<(), ApiError>;

    async fn set_membership(
        &self,
        user_id: &str,
        room_id: &str,
        membership: Membership,
    ) -> Result<(), ApiError>;

    /// The caller's power level in a room, from the backend's room state.
    async fn power_level(&self, user_id: &str, room_id: &str) -> Result<i64, ApiError>;

    /// Posts a notice message into the room as the notices principal.
    async fn send_notice(&self, room_id: &str, body: &str) -> Result<(), ApiError>;
}

/// HTTP client implementation of [`RoomService`].
pub struct HttpRoomService {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    notices_user: String,
    notices_power_level: i64,
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct PowerLevel {
    power_level: i64,
}

impl HttpRoomService {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        notices_user: impl Into<String>,
        notices_power_level: i64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
            notices_user: notices_user.into(),
            notices_power_level,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::Internal(format!(
                "room service {what} failed with status {}",
                response.status()
            )))
        }
    }

    fn transport(what: &str) -> impl Fn(reqwest::Error) -> ApiError + '_ {
        move |err| ApiError::Internal(format!("room service {what} failed: {err}"))
    }
}

#[async_trait]
impl RoomService for HttpRoomService {
    async fn create_room(
        &self,
        name: &str,
        topic: &str,
        room_type: SecuredRoomType,
    ) -> Result<String, ApiError> {
        let power_levels = serde_json::Map::from_iter([(
            self.notices_user.clone(),
            json!(self.notices_power_level),
        )]);
        let response = self
            .client
            .post(self.url("/rooms"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "name": name,
                "topic": topic,
                "creation_type": room_type.as_str(),
                "visibility": "public",
                "power_levels": power_levels,
            }))
            .send()
            .await
            .map_err(Self::transport("create_room"))?;

        let created: CreatedRoom = Self::check(response, "create_room")
            .await?
            .json()
            .await
            .map_err(Self::transport("create_room"))?;
        Ok(created.room_id)
    }

    async fn room_exists(&self, room_id: &str) -> Result<bool, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/rooms/{room_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::transport("room_exists"))?;
        Ok(response.status().is_success())
    }

    async fn update_room_name(&self, room_id: &str, name: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/rooms/{room_id}/name")))
            .bearer_auth(&self.access_token)
            .json(&json!({"name": name}))
            .send()
            .await
            .map_err(Self::transport("update_room_name"))?;
        Self::check(response, "update_room_name").await.map(|_| ())
    }

    async fn update_room_topic(&self, room_id: &str, topic: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/rooms/{room_id}/topic")))
            .bearer_auth(&self.access_token)
            .json(&json!({"topic": topic}))
            .send()
            .await
            .map_err(Self::transport("update_room_topic"))?;
        Self::check(response, "update_room_topic").await.map(|_| ())
    }

    async fn shutdown_room(&self, room_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/rooms/{room_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::transport("shutdown_room"))?;
        Self::check(response, "shutdown_room").await.map(|_| ())
    }

    async fn set_membership(
        &self,
        user_id: &str,
        room_id: &str,
        membership: Membership,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/rooms/{room_id}/members/{user_id}")))
            .bearer_auth(&self.access_token)
            .json(&json!({"membership": membership.as_str()}))
            .send()
            .await
            .map_err(Self::transport("set_membership"))?;
        Self::check(response, "set_membership").await.map(|_| ())
    }

    async fn power_level(&self, user_id: &str, room_id: &str) -> Result<i64, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/rooms/{room_id}/members/{user_id}/power_level")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::transport("power_level"))?;

        let level: PowerLevel = Self::check(response, "power_level")
            .await?
            .json()
            .await
            .map_err(Self::transport("power_level"))?;
        Ok(level.power_level)
    }

    async fn send_notice(&self, room_id: &str, body: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/rooms/{room_id}/notices")))
            .bearer_auth(&self.access_token)
            .json(&json!({"body": body}))
            .send()
            .await
            .map_err(Self::transport("send_notice"))?;
        Self::check(response, "send_notice").await.map(|_| ())
    }
}
