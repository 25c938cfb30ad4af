//! Store - the local home of every document.
//!
//! The store assigns versions, keeps the dirty flag honest and writes each
//! accepted change through to a [`StorageBackend`] before it becomes visible.

use crate::{
    error::{StoreError, StoreResult},
    Document, DocumentDraft, DocumentId, MemoryBackend, StorageBackend, Timestamp, Version,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a successful [`DocumentStore::put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersion {
    pub document_id: DocumentId,
    /// The version just written
    pub version: Version,
    /// True when this write created the document (or revived a tombstone)
    pub created: bool,
    /// Copy of the document as written
    pub snapshot: Document,
}

/// A delete that the caller must forward to the sync queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteIntent {
    pub document_id: DocumentId,
    /// The tombstone as written
    pub snapshot: Document,
}

/// Thread-safe document store.
///
/// Operations on different ids proceed concurrently; operations on the same id
/// are serialized by the map entry lock, which is held across the backend write
/// so the in-memory view never runs ahead of what is durable.
pub struct DocumentStore {
    documents: DashMap<DocumentId, Document>,
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("documents", &self.documents.len())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Create an empty store over `backend`, ignoring anything already stored.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            documents: DashMap::new(),
            backend,
        }
    }

    /// Create a store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a store, loading every record the backend holds.
    pub fn open(backend: Arc<dyn StorageBackend>) -> StoreResult<Self> {
        let documents = DashMap::new();
        for bytes in backend.load_documents()? {
            let document: Document = serde_json::from_slice(&bytes)?;
            documents.insert(document.id.clone(), document);
        }
        Ok(Self { documents, backend })
    }

    /// Get the backend this store writes through to.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn persist(&self, document: &Document) -> StoreResult<()> {
        let bytes = serde_json::to_vec(document)?;
        self.backend.write_document(&document.id, &bytes)
    }

    /// Write a local edit.
    ///
    /// Assigns version 1 to a new document, otherwise the stored version + 1,
    /// and marks the document dirty. Nothing changes if the backend write fails.
    pub fn put(&self, draft: DocumentDraft, timestamp: Timestamp) -> StoreResult<StoredVersion> {
        match self.documents.entry(draft.id.clone()) {
            Entry::Occupied(mut entry) => {
                let created = entry.get().deleted;
                let mut next = entry.get().clone();
                next.apply_draft(draft, timestamp);
                self.persist(&next)?;
                entry.insert(next.clone());
                Ok(StoredVersion {
                    document_id: next.id.clone(),
                    version: next.version,
                    created,
                    snapshot: next,
                })
            }
            Entry::Vacant(entry) => {
                let document = Document::from_draft(draft, timestamp);
                self.persist(&document)?;
                entry.insert(document.clone());
                Ok(StoredVersion {
                    document_id: document.id.clone(),
                    version: document.version,
                    created: true,
                    snapshot: document,
                })
            }
        }
    }

    /// Get the latest local snapshot of an active document.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents
            .get(id)
            .filter(|d| d.is_active())
            .map(|d| d.value().clone())
    }

    /// Get a document including tombstones.
    pub fn get_including_deleted(&self, id: &str) -> Option<Document> {
        self.documents.get(id).map(|d| d.value().clone())
    }

    /// Last remote-confirmed version of a document.
    pub fn base_version(&self, id: &str) -> Option<Version> {
        self.documents.get(id).map(|d| d.base_version)
    }

    /// Clear the dirty flag if `confirmed_version` is still the stored version.
    ///
    /// Returns `false` (and changes nothing) when a newer local write has
    /// already superseded the confirmation.
    pub fn mark_clean(&self, id: &str, confirmed_version: Version) -> StoreResult<bool> {
        self.update_if(id, |doc| {
            if doc.version != confirmed_version || !doc.is_dirty {
                return false;
            }
            doc.is_dirty = false;
            true
        })
    }

    /// Record a remote confirmation: the remote now holds `remote_version`, and
    /// it was written from local `confirmed_version`.
    ///
    /// The base version always moves forward; the dirty flag only clears when
    /// no newer local write exists.
    pub fn confirm(
        &self,
        id: &str,
        confirmed_version: Version,
        remote_version: Version,
    ) -> StoreResult<bool> {
        let mut cleaned = false;
        self.update_if(id, |doc| {
            if doc.version == confirmed_version && doc.is_dirty {
                doc.is_dirty = false;
                cleaned = true;
            }
            if doc.base_version == remote_version && !cleaned {
                return false;
            }
            doc.base_version = remote_version;
            true
        })?;
        Ok(cleaned)
    }

    /// Point a document's base at `remote_version` without touching its content.
    pub fn rebase(&self, id: &str, remote_version: Version) -> StoreResult<()> {
        let found = self.update_if(id, |doc| {
            doc.base_version = remote_version;
            true
        })?;
        if !found {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a document, leaving a dirty tombstone at version + 1.
    ///
    /// Returns `None` when the id is unknown or already deleted.
    pub fn delete(&self, id: &str, timestamp: Timestamp) -> StoreResult<Option<DeleteIntent>> {
        let Some(mut entry) = self.documents.get_mut(id) else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(None);
        }

        let mut next = entry.value().clone();
        next.mark_deleted(timestamp);
        self.persist(&next)?;
        *entry = next.clone();

        Ok(Some(DeleteIntent {
            document_id: next.id.clone(),
            snapshot: next,
        }))
    }

    /// Install a remote snapshot as the confirmed local state.
    ///
    /// The local version becomes `max(remote.version, local.version + 1)` so it
    /// never goes backwards; the base version becomes `remote.version`.
    pub fn adopt_remote(&self, remote: &Document) -> StoreResult<Document> {
        match self.documents.entry(remote.id.clone()) {
            Entry::Occupied(mut entry) => {
                let mut next = remote.clone();
                next.version = remote.version.max(entry.get().version + 1);
                next.base_version = remote.version;
                next.is_dirty = false;
                next.deleted = false;
                self.persist(&next)?;
                entry.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(entry) => {
                let mut next = remote.clone();
                next.base_version = remote.version;
                next.is_dirty = false;
                next.deleted = false;
                self.persist(&next)?;
                entry.insert(next.clone());
                Ok(next)
            }
        }
    }

    /// Accept that the remote deleted a document: leave a clean tombstone.
    pub fn accept_remote_delete(&self, id: &str, timestamp: Timestamp) -> StoreResult<()> {
        self.update_if(id, |doc| {
            if !doc.deleted {
                doc.mark_deleted(timestamp);
            }
            doc.is_dirty = false;
            true
        })?;
        Ok(())
    }

    /// Ids of documents whose current version is unconfirmed.
    pub fn dirty_documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self
            .documents
            .iter()
            .filter(|d| d.is_dirty)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of all active documents, sorted.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self
            .documents
            .iter()
            .filter(|d| d.is_active())
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Count of active documents.
    pub fn len(&self) -> usize {
        self.documents.iter().filter(|d| d.is_active()).count()
    }

    /// Check if the store holds no active documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `change` to a copy of the document, persisting and publishing it
    /// only when `change` reports a modification.
    fn update_if<F>(&self, id: &str, change: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let Some(mut entry) = self.documents.get_mut(id) else {
            return Ok(false);
        };
        let mut next = entry.value().clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.persist(&next)?;
        *entry = next;
        Ok(true)
    }
}
