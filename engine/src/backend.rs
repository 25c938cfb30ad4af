//! Storage backend trait and the in-memory backend.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable storage for document records and the sync queue.
///
/// Backends are opaque byte stores: one record per document id plus a single
/// queue blob. The engine owns the encoding.
///
/// # Invariants
///
/// - `write_document` replaces the previous record for that id atomically
/// - `load_documents` returns every record last written, in any order
/// - A failed write leaves the previous record in place
/// - Backends must be `Send + Sync`; the store calls them concurrently for
///   different document ids
///
/// # Implementors
///
/// - [`MemoryBackend`] - for tests and ephemeral sessions
/// - `quill_sync::FileBackend` - one JSON file per document on disk
pub trait StorageBackend: Send + Sync {
    /// Writes the record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CapacityExceeded`] when the medium is full.
    fn write_document(&self, id: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Reads every stored document record.
    fn load_documents(&self) -> StoreResult<Vec<Vec<u8>>>;

    /// Replaces the persisted queue.
    fn write_queue(&self, bytes: &[u8]) -> StoreResult<()>;

    /// Reads the persisted queue, if one was ever written.
    fn load_queue(&self) -> StoreResult<Option<Vec<u8>>>;
}

/// An in-memory storage backend with an optional byte capacity.
///
/// The capacity applies to document records only.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    queue: RwLock<Option<Vec<u8>>>,
    capacity: Option<usize>,
}

impl MemoryBackend {
    /// Creates an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that refuses writes past `bytes` of document data.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::default()
        }
    }

    /// Bytes currently used by document records.
    pub fn used(&self) -> usize {
        self.documents.read().values().map(Vec::len).sum()
    }

    /// Raw record for `id`, useful in tests.
    pub fn raw_document(&self, id: &str) -> Option<Vec<u8>> {
        self.documents.read().get(id).cloned()
    }

    /// Raw queue blob, useful in tests.
    pub fn raw_queue(&self) -> Option<Vec<u8>> {
        self.queue.read().clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn write_document(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut documents = self.documents.write();

        if let Some(capacity) = self.capacity {
            let replaced = documents.get(id).map_or(0, Vec::len);
            let used: usize = documents.values().map(Vec::len).sum::<usize>() - replaced;
            let available = capacity.saturating_sub(used);
            if bytes.len() > available {
                return Err(StoreError::CapacityExceeded {
                    needed: bytes.len(),
                    available,
                });
            }
        }

        documents.insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_documents(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.documents.read().values().cloned().collect())
    }

    fn write_queue(&self, bytes: &[u8]) -> StoreResult<()> {
        *self.queue.write() = Some(bytes.to_vec());
        Ok(())
    }

    fn load_queue(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.queue.read().clone())
    }
}
