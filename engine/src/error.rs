//! Error types for the Quill engine.

use crate::{DocumentId, ItemId};
use thiserror::Error;

/// Errors raised by the document store and its storage backend.
///
/// Every variant is a local write failure: the caller keeps the unsaved
/// content and retries later. None of them is fatal to the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage capacity exceeded: needed {needed} bytes, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

/// All possible errors from the Quill engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    // Queue errors
    #[error("queue item not found: {0}")]
    UnknownItem(ItemId),

    #[error("queue item is not dead-lettered: {0}")]
    NotDeadLettered(ItemId),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::CapacityExceeded {
            needed: 120,
            available: 64,
        };
        assert_eq!(
            err.to_string(),
            "storage capacity exceeded: needed 120 bytes, 64 available"
        );

        let err = Error::UnknownItem("doc-1:7".into());
        assert_eq!(err.to_string(), "queue item not found: doc-1:7");

        let err: Error = StoreError::NotFound("doc-9".into()).into();
        assert_eq!(err.to_string(), "document not found: doc-9");
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(matches!(
            StoreError::from(err),
            StoreError::SerializationError(_)
        ));
    }
}
