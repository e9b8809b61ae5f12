//! Grant expiry math shared by the sweeper and the expiration listing.

/// Days a grant stays valid when the policy does not say otherwise.
pub const DEFAULT_EXPIRATION_TIME_DAYS: f64 = 90.0;

/// Days before the deadline at which the user is warned.
pub const WARNING_DAYS: f64 = 7.0;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Room power level that marks a user as moderator of that room, allowed to
/// edit (not create or delete) its policy.
pub const MODERATOR_POWER_LEVEL: i64 = 50;

/// Where a grant stands relative to its policy's TTL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpiryStatus {
    Active { days_left: f64 },
    /// Inside the warning window (`expiration_time_days - WARNING_DAYS`
    /// after joining). For policies shorter than the warning window the
    /// whole lifetime counts as warning.
    Warning { days_left: f64 },
    Expired,
}

impl ExpiryStatus {
    /// Classifies a grant joined at `join_time` as of `now` (both unix
    /// epoch seconds) under a TTL of `expiration_time_days`.
    ///
    /// Remaining days are clamped at zero; a negative warning window means
    /// the grant is warning from the moment it is created.
    pub fn of(join_time: i64, now: i64, expiration_time_days: f64) -> ExpiryStatus {
        let elapsed_days = (now - join_time) as f64 / SECONDS_PER_DAY;
        let days_left = expiration_time_days - elapsed_days;

        if days_left <= 0.0 {
            ExpiryStatus::Expired
        } else if elapsed_days >= (expiration_time_days - WARNING_DAYS).max(0.0) {
            ExpiryStatus::Warning { days_left }
        } else {
            ExpiryStatus::Active { days_left }
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, ExpiryStatus::Expired)
    }
}

/// True when a grant joined at `join_time` has outlived its TTL at `now`.
/// This is the exact predicate the sweep query implements in SQL.
pub fn is_past_ttl(join_time: i64, now: i64, expiration_time_days: f64) -> bool {
    (now - join_time) as f64 > expiration_time_days * SECONDS_PER_DAY
}
