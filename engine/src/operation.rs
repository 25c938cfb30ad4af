//! Remote operations and their outcomes.
//!
//! Every queued item is sent to the remote store as a [`RemoteOperation`]. The
//! store answers with a [`RemoteOutcome`], so failure handling is a match on a
//! value rather than a chain of error branches.

use crate::{Document, DocumentId, Version};
use serde::{Deserialize, Serialize};

/// What a queued operation asks the remote store to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation as sent to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub document_id: DocumentId,
    /// Snapshot taken when the operation was queued
    pub payload: Document,
    /// Remote version this operation was written against (0 for a create)
    pub base_version: Version,
}

impl RemoteOperation {
    pub fn new(kind: OperationKind, payload: Document, base_version: Version) -> Self {
        Self {
            kind,
            document_id: payload.id.clone(),
            payload,
            base_version,
        }
    }
}

/// The remote store's answer to a [`RemoteOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RemoteOutcome {
    /// Applied; the remote now holds `version`
    Applied { version: Version },
    /// The remote's current version differs from `base_version`.
    /// `remote` is `None` when the remote deleted the document (tombstone).
    Conflict { remote: Option<Document> },
    /// Network or server failure worth retrying
    Transient { message: String },
    /// Permission or auth rejection; never retried automatically
    Rejected { message: String },
}

impl RemoteOutcome {
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteOutcome::Transient {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        RemoteOutcome::Rejected {
            message: message.into(),
        }
    }
}
