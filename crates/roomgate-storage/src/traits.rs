//! Store traits every backend must implement.

use async_trait::async_trait;
use roomgate_core::SecuredRoom;

use crate::error::StorageError;
use crate::types::Grant;

/// Durable CRUD over room admission policies.
///
/// Implementations must be thread-safe (`Send + Sync`). Each operation is a
/// single atomic storage transaction; callers never need cross-call locking.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Persists a new policy. The policy must already carry its `room_id`
    /// (assigned when the backing room was created).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a policy for the room exists.
    async fn create(&self, policy: &SecuredRoom) -> Result<(), StorageError>;

    /// Fetches the policy for one room, or `None` when the room is not secured.
    async fn get(&self, room_id: &str) -> Result<Option<SecuredRoom>, StorageError>;

    /// All policies.
    async fn list(&self) -> Result<Vec<SecuredRoom>, StorageError>;

    /// Replaces the stored policy with the same `room_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown room. Immutability of
    /// `room_type` is enforced above the store.
    async fn update(&self, policy: &SecuredRoom) -> Result<(), StorageError>;

    /// Deletes the policy for a room. Grants for the room are *not* deleted
    /// here; orphaned grants surface on listing and are cleaned up lazily.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown room.
    async fn delete(&self, room_id: &str) -> Result<(), StorageError>;
}

/// Durable CRUD over per-user access grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// True when the user holds a non-expired grant for the room.
    async fn is_allowed(&self, user_id: &str, room_id: &str) -> Result<bool, StorageError>;

    /// Idempotent upsert: renews `join_time` and clears `expired` when a row
    /// exists, inserts otherwise. `now` is unix epoch seconds.
    async fn allow(&self, user_id: &str, room_id: &str, now: i64) -> Result<(), StorageError>;

    /// Atomically marks every grant whose policy TTL has elapsed at `now`
    /// and returns exactly the newly-marked (user, room) pairs.
    ///
    /// Grants for rooms without a policy never match. `now` is evaluated
    /// once for the whole sweep, not per row.
    async fn sweep_expired(&self, now: i64) -> Result<Vec<(String, String)>, StorageError>;

    /// All grants currently flagged expired, including rows marked in an
    /// earlier sweep whose eviction has not succeeded yet.
    async fn list_expired(&self) -> Result<Vec<(String, String)>, StorageError>;

    /// All grants held by one user.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Grant>, StorageError>;

    /// Removes a single grant row without touching room membership. Used
    /// when a user acknowledges an expiry notice, and by the sweeper once
    /// membership removal has succeeded.
    async fn dismiss(&self, room_id: &str, user_id: &str) -> Result<(), StorageError>;

    /// Flags every grant for a room expired so the next sweep evicts all of
    /// its members.
    async fn remove_all(&self, room_id: &str) -> Result<(), StorageError>;
}
