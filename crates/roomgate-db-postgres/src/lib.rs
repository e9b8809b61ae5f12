//! PostgreSQL storage backend.
//!
//! Persists secured-room policies and access grants in two tables
//! (`secured_rooms`, `allowed_to_join_room`) and implements both store
//! traits on top of a sqlx connection pool. The sweep's read-then-mark step
//! runs as a single `UPDATE .. RETURNING` statement so it is transactionally
//! consistent with one evaluation of "now".

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod storage;

pub use config::PostgresConfig;
pub use error::PostgresError;
pub use storage::PostgresStore;
