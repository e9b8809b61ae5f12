//! In-memory storage backend.
//!
//! Implements both store traits over concurrent maps. Used by tests and by
//! single-process development setups where durability does not matter.

mod storage;

pub use storage::MemoryStore;
