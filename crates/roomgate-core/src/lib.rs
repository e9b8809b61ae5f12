//! Core domain model for attribute-gated room admission.
//!
//! This crate holds the pure, I/O-free pieces of the admission engine:
//! secured-room policies and their validation, the wire model of a
//! disclosure verdict, the decision function that matches one against the
//! other, and the expiry math used by the background sweeper.

pub mod admission;
pub mod expiry;
pub mod policy;
pub mod verdict;

pub use admission::{Admission, decide};
pub use expiry::{
    DEFAULT_EXPIRATION_TIME_DAYS, ExpiryStatus, MODERATOR_POWER_LEVEL, SECONDS_PER_DAY,
    WARNING_DAYS,
};
pub use policy::{AttributeRule, SecuredRoom, SecuredRoomType, ValidationError};
pub use verdict::{DisclosedAttribute, DisclosureVerdict, ProofStatus};
