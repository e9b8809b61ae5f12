//! Storage abstraction for the roomgate admission service.
//!
//! Defines the [`PolicyStore`] and [`GrantStore`] traits every backend must
//! implement, the shared row types, and [`StorageError`].

pub mod error;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use traits::{GrantStore, PolicyStore};
pub use types::Grant;
