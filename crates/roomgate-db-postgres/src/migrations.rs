//! Schema setup for the PostgreSQL storage backend.
//!
//! The schema is two tables; the statements are idempotent and run once at
//! startup. There is no migration tooling beyond this.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::{info, instrument};

use crate::error::{PostgresError, Result};

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS secured_rooms(
        room_id TEXT NOT NULL,
        name TEXT NOT NULL,
        topic TEXT NOT NULL DEFAULT '',
        accepted TEXT NOT NULL,
        room_type TEXT NOT NULL,
        user_txt TEXT NOT NULL,
        expiration_time_days DOUBLE PRECISION NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS secured_rooms_id_idx
        ON secured_rooms(room_id)",
    "CREATE TABLE IF NOT EXISTS allowed_to_join_room(
        user_id TEXT NOT NULL,
        room_id TEXT NOT NULL,
        join_time BIGINT NOT NULL,
        expired BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS allowed_user_room_idx
        ON allowed_to_join_room(user_id, room_id)",
];

/// Creates the `secured_rooms` and `allowed_to_join_room` tables when they
/// do not exist yet.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> Result<()> {
    info!("Ensuring roomgate schema");

    for statement in STATEMENTS {
        query(statement)
            .execute(pool)
            .await
            .map_err(|e| PostgresError::Migration(e.to_string()))?;
    }

    info!("Roomgate schema is up to date");

    Ok(())
}
