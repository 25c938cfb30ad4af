//! Error types for the sync runtime.

use crate::config::ConfigError;
use quill_engine::StoreError;

/// Errors surfaced by the runtime to its host.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] quill_engine::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine has been disposed")]
    Disposed,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, SyncError>;
