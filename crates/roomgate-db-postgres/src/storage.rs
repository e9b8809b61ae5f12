//! PostgreSQL implementation of the store traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};

use roomgate_core::{AttributeRule, SecuredRoom, SecuredRoomType};
use roomgate_storage::{Grant, GrantStore, PolicyStore, StorageError};

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool;

/// PostgreSQL-backed policy and grant store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new `PostgresStore` from the given configuration.
    ///
    /// Builds the connection pool and, when configured, ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool cannot be created or schema setup fails.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await.map_err(StorageError::from)?;

        if config.run_migrations {
            migrations::run(&pool).await.map_err(StorageError::from)?;
        }

        Ok(Self { pool })
    }

    /// Creates a new `PostgresStore` from an existing connection pool.
    /// Schema setup is not run automatically with this constructor.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_err(err: sqlx_core::error::Error) -> StorageError {
    StorageError::backend(err.to_string())
}

fn room_id_of(policy: &SecuredRoom) -> Result<&str, StorageError> {
    policy
        .room_id
        .as_deref()
        .ok_or_else(|| StorageError::invalid_data("policy has no room_id"))
}

fn encode_accepted(policy: &SecuredRoom) -> Result<String, StorageError> {
    serde_json::to_string(&policy.accepted)
        .map_err(|e| StorageError::invalid_data(format!("unserializable accepted map: {e}")))
}

fn row_to_policy(row: &PgRow) -> Result<SecuredRoom, StorageError> {
    let accepted: String = row.try_get("accepted").map_err(backend_err)?;
    let accepted: BTreeMap<String, AttributeRule> = serde_json::from_str(&accepted)
        .map_err(|e| StorageError::invalid_data(format!("corrupt accepted column: {e}")))?;

    let room_type: String = row.try_get("room_type").map_err(backend_err)?;
    let room_type: SecuredRoomType =
        serde_json::from_value(serde_json::Value::String(room_type.clone()))
            .map_err(|_| StorageError::invalid_data(format!("unknown room type '{room_type}'")))?;

    Ok(SecuredRoom {
        room_id: Some(row.try_get("room_id").map_err(backend_err)?),
        name: row.try_get("name").map_err(backend_err)?,
        topic: row.try_get("topic").map_err(backend_err)?,
        accepted,
        room_type,
        expiration_time_days: row
            .try_get("expiration_time_days")
            .map_err(backend_err)?,
        user_txt: row.try_get("user_txt").map_err(backend_err)?,
    })
}

fn row_to_grant(row: &PgRow) -> Result<Grant, StorageError> {
    Ok(Grant {
        user_id: row.try_get("user_id").map_err(backend_err)?,
        room_id: row.try_get("room_id").map_err(backend_err)?,
        join_time: row.try_get("join_time").map_err(backend_err)?,
        expired: row.try_get("expired").map_err(backend_err)?,
    })
}

fn row_to_pair(row: &PgRow) -> Result<(String, String), StorageError> {
    Ok((
        row.try_get("user_id").map_err(backend_err)?,
        row.try_get("room_id").map_err(backend_err)?,
    ))
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn create(&self, policy: &SecuredRoom) -> Result<(), StorageError> {
        let room_id = room_id_of(policy)?;
        let result = query(
            "INSERT INTO secured_rooms
                 (room_id, name, topic, accepted, room_type, user_txt, expiration_time_days)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (room_id) DO NOTHING",
        )
        .bind(room_id)
        .bind(&policy.name)
        .bind(&policy.topic)
        .bind(encode_accepted(policy)?)
        .bind(policy.room_type.as_str())
        .bind(&policy.user_txt)
        .bind(policy.expiration_time_days)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::already_exists(room_id));
        }
        Ok(())
    }

    async fn get(&self, room_id: &str) -> Result<Option<SecuredRoom>, StorageError> {
        let row = query("SELECT * FROM secured_rooms WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        row.as_ref().map(row_to_policy).transpose()
    }

    async fn list(&self) -> Result<Vec<SecuredRoom>, StorageError> {
        let rows = query("SELECT * FROM secured_rooms ORDER BY room_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.iter().map(row_to_policy).collect()
    }

    async fn update(&self, policy: &SecuredRoom) -> Result<(), StorageError> {
        let room_id = room_id_of(policy)?;
        let result = query(
            "UPDATE secured_rooms
             SET name = $2, topic = $3, accepted = $4, room_type = $5,
                 user_txt = $6, expiration_time_days = $7
             WHERE room_id = $1",
        )
        .bind(room_id)
        .bind(&policy.name)
        .bind(&policy.topic)
        .bind(encode_accepted(policy)?)
        .bind(policy.room_type.as_str())
        .bind(&policy.user_txt)
        .bind(policy.expiration_time_days)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(room_id));
        }
        Ok(())
    }

    async fn delete(&self, room_id: &str) -> Result<(), StorageError> {
        let result = query("DELETE FROM secured_rooms WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(room_id));
        }
        Ok(())
    }
}

#[async_trait]
impl GrantStore for PostgresStore {
    async fn is_allowed(&self, user_id: &str, room_id: &str) -> Result<bool, StorageError> {
        let row = query(
            "SELECT 1 AS one FROM allowed_to_join_room
             WHERE user_id = $1 AND room_id = $2 AND NOT expired",
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(row.is_some())
    }

    async fn allow(&self, user_id: &str, room_id: &str, now: i64) -> Result<(), StorageError> {
        query(
            "INSERT INTO allowed_to_join_room (user_id, room_id, join_time, expired)
             VALUES ($1, $2, $3, FALSE)
             ON CONFLICT (user_id, room_id)
             DO UPDATE SET join_time = EXCLUDED.join_time, expired = FALSE",
        )
        .bind(user_id)
        .bind(room_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    async fn sweep_expired(&self, now: i64) -> Result<Vec<(String, String)>, StorageError> {
        // One statement, one evaluation of `now`: a slow sweep cannot extend
        // some users' effective TTL. Grants without a policy never match.
        let rows = query(
            "UPDATE allowed_to_join_room AS a
             SET expired = TRUE
             FROM secured_rooms AS s
             WHERE s.room_id = a.room_id
               AND NOT a.expired
               AND ($1 - a.join_time) > s.expiration_time_days * 86400
             RETURNING a.user_id, a.room_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter().map(row_to_pair).collect()
    }

    async fn list_expired(&self) -> Result<Vec<(String, String)>, StorageError> {
        let rows = query(
            "SELECT user_id, room_id FROM allowed_to_join_room
             WHERE expired ORDER BY user_id, room_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter().map(row_to_pair).collect()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Grant>, StorageError> {
        let rows = query(
            "SELECT user_id, room_id, join_time, expired
             FROM allowed_to_join_room WHERE user_id = $1 ORDER BY room_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter().map(row_to_grant).collect()
    }

    async fn dismiss(&self, room_id: &str, user_id: &str) -> Result<(), StorageError> {
        query("DELETE FROM allowed_to_join_room WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    async fn remove_all(&self, room_id: &str) -> Result<(), StorageError> {
        query("UPDATE allowed_to_join_room SET expired = TRUE WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }
}
