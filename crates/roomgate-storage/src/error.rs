//! Error type shared by all storage backends.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No policy exists for the given room.
    #[error("no secured room with id {room_id}")]
    NotFound {
        /// The room whose policy was not found.
        room_id: String,
    },

    /// A policy for this room already exists.
    #[error("secured room already exists: {room_id}")]
    AlreadyExists { room_id: String },

    /// Stored data could not be decoded (corrupt `accepted` JSON, unknown
    /// room type value).
    #[error("invalid stored policy: {message}")]
    InvalidData { message: String },

    /// Failed to reach or query the storage backend.
    #[error("storage backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(room_id: impl Into<String>) -> Self {
        Self::NotFound {
            room_id: room_id.into(),
        }
    }

    #[must_use]
    pub fn already_exists(room_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            room_id: room_id.into(),
        }
    }

    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
