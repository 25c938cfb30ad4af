//! # Quill Engine
//!
//! The local-first persistence core behind Quill documents.
//!
//! This crate owns every decision that does not need a clock, a socket or a
//! runtime: how documents are versioned and stored, how writes become queued
//! remote operations, in what order those operations drain, how long to back
//! off after a failure, and which side survives a conflict. The `quill-sync`
//! crate supplies timers, the network and the disk.
//!
//! ## Design Principles
//!
//! - **No IO**: storage goes through the [`StorageBackend`] trait, time is passed
//!   in as millisecond timestamps, jitter is passed in as a sample
//! - **Deterministic**: the same inputs always produce the same queue order and
//!   the same conflict resolution
//! - **Copy on enqueue**: queue items hold snapshots, never the live document
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] carries a local `version` that only ever increases, a
//! `baseVersion` recording the last version the remote store confirmed, and an
//! `isDirty` flag that stays set until the remote confirms the current version.
//! Deletes leave a tombstone so a re-created id keeps counting upwards.
//!
//! ### Document Store
//!
//! [`DocumentStore`] is safe to share across threads. Calls for different
//! document ids run concurrently; calls for the same id are serialized.
//!
//! ### Sync Queue
//!
//! [`SyncQueue`] keeps pending [`OperationKind::Create`], [`OperationKind::Update`]
//! and [`OperationKind::Delete`] operations in enqueue order. Only the head item
//! of each document is ever drainable, so a newer snapshot can never overtake an
//! older one. Unsent updates for the same document collapse into one.
//!
//! ### Conflicts
//!
//! [`ConflictResolver`] turns a rejected operation plus the remote snapshot into
//! a [`ConflictResolution`], according to a [`ConflictPolicy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use quill_engine::{DocumentDraft, DocumentStore, OperationKind, Priority, SyncQueue};
//!
//! let store = DocumentStore::in_memory();
//! let mut queue = SyncQueue::new(5);
//!
//! let stored = store
//!     .put(DocumentDraft::new("doc-1", "Essay", "First draft"), 1_706_745_600_000)
//!     .unwrap();
//! assert_eq!(stored.version, 1);
//!
//! queue.enqueue(OperationKind::Create, stored.snapshot, Priority::Normal, 1_706_745_600_000);
//!
//! let batch = queue.next_batch(10, 1_706_745_600_000);
//! assert_eq!(batch.len(), 1);
//! assert_eq!(batch[0].document_id, "doc-1");
//! ```

pub mod autosave;
pub mod backend;
pub mod conflict;
pub mod document;
pub mod error;
pub mod operation;
pub mod queue;
pub mod retry;
pub mod snapshot;
pub mod status;
pub mod store;

// Re-export main types at crate root
pub use autosave::{AutoSave, AutoSaveConfig, AutoSaveState, Directives, SaveSnapshot, SaveStatus};
pub use backend::{MemoryBackend, StorageBackend};
pub use conflict::{
    ConflictPolicy, ConflictResolution, ConflictResolver, DocumentMerge, Resolution,
    ResolutionAction, UnknownPolicy,
};
pub use document::{Document, DocumentDraft, DocumentMetadata};
pub use error::{Error, StoreError};
pub use operation::{OperationKind, RemoteOperation, RemoteOutcome};
pub use queue::{Enqueued, ItemState, Priority, RetryDecision, SyncQueue, SyncQueueItem};
pub use retry::RetryPolicy;
pub use snapshot::{QueueSnapshot, QUEUE_FORMAT_VERSION};
pub use status::SyncStatus;
pub use store::{DeleteIntent, DocumentStore, StoredVersion};

/// Type aliases for clarity
pub type DocumentId = String;
pub type ItemId = String;
pub type Version = u64;
pub type Timestamp = u64;
