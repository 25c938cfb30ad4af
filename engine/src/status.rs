//! Observable synchronization health.

use crate::{DocumentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process-wide sync state, one per engine lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// `None` until the platform reports connectivity
    pub is_online: Option<bool>,
    pub is_syncing: bool,
    /// End of the last drain cycle that ran while online
    pub last_sync: Option<Timestamp>,
    /// Queue items still in active draining
    pub pending_items: usize,
    /// Items waiting for explicit user action
    pub dead_letters: usize,
    /// Last fatal error, if any
    pub error: Option<String>,
    /// Fatal per-document errors (dead letters, permission rejections)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub document_errors: BTreeMap<DocumentId, String>,
}

impl SyncStatus {
    /// Initial state at engine start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal error for one document.
    pub fn fail_document(&mut self, document_id: impl Into<DocumentId>, error: impl Into<String>) {
        let error = error.into();
        self.error = Some(error.clone());
        self.document_errors.insert(document_id.into(), error);
    }

    /// Forget a document's error, clearing the global error once none remain.
    pub fn clear_document(&mut self, document_id: &str) {
        self.document_errors.remove(document_id);
        if self.document_errors.is_empty() {
            self.error = None;
        }
    }

    /// True when online with nothing left to send.
    pub fn is_settled(&self) -> bool {
        self.is_online == Some(true) && !self.is_syncing && self.pending_items == 0
    }
}
