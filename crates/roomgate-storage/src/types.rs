//! Row types shared across storage backends.

use serde::{Deserialize, Serialize};

/// A persisted record that a user currently satisfies a room's policy.
///
/// One row per (user, room): a renewed disclosure updates `join_time` in
/// place instead of inserting a second row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: String,
    pub room_id: String,
    /// Unix epoch seconds of the most recent successful admission.
    pub join_time: i64,
    /// Set by the expiry sweeper, never by the admission path.
    pub expired: bool,
}
