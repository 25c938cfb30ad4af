//! In-memory versioned document table.
//!
//! Each document carries a remote version that increases by one on every
//! applied operation. Deletes leave a tombstone so the version keeps counting
//! when the id is created again.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use quill_engine::{Document, DocumentId, OperationKind, RemoteOperation, RemoteOutcome, Version};
use serde::Serialize;

/// The stored state of one document id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub version: Version,
    /// Current content; `None` once deleted
    pub document: Option<Document>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDocument {
    fn is_tombstone(&self) -> bool {
        self.document.is_none()
    }
}

/// Thread-safe table of remote documents.
#[derive(Debug, Default)]
pub struct DocumentTable {
    documents: DashMap<DocumentId, StoredDocument>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an operation if its base version matches the stored version.
    ///
    /// A create is also accepted over a tombstone or a missing id whatever its
    /// base, since there is nothing to overwrite. Anything else written against
    /// a stale base is a conflict carrying the current document.
    pub fn apply(&self, operation: RemoteOperation) -> RemoteOutcome {
        let RemoteOperation {
            kind,
            document_id,
            payload,
            base_version,
        } = operation;

        match self.documents.entry(document_id) {
            Entry::Vacant(entry) => {
                if kind != OperationKind::Create {
                    tracing::debug!(document_id = %entry.key(), %kind, "operation on unknown document");
                    return RemoteOutcome::Conflict { remote: None };
                }
                let stored = stored_version(payload, 1);
                entry.insert(stored);
                RemoteOutcome::Applied { version: 1 }
            }
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let recreate = kind == OperationKind::Create && current.is_tombstone();
                if current.version != base_version && !recreate {
                    tracing::debug!(
                        document_id = %entry.key(),
                        %kind,
                        base_version,
                        current = current.version,
                        "version conflict"
                    );
                    return RemoteOutcome::Conflict {
                        remote: current.document.clone(),
                    };
                }
                if current.is_tombstone() && kind != OperationKind::Create {
                    return RemoteOutcome::Conflict { remote: None };
                }

                let version = current.version + 1;
                let stored = match kind {
                    OperationKind::Delete => StoredDocument {
                        version,
                        document: None,
                        updated_at: Utc::now(),
                    },
                    OperationKind::Create | OperationKind::Update => {
                        stored_version(payload, version)
                    }
                };
                entry.insert(stored);
                RemoteOutcome::Applied { version }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredDocument> {
        self.documents.get(id).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn stored_version(mut document: Document, version: Version) -> StoredDocument {
    document.version = version;
    document.base_version = version;
    document.is_dirty = false;
    document.deleted = false;
    StoredDocument {
        version,
        document: Some(document),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_engine::DocumentDraft;

    fn op(kind: OperationKind, content: &str, base: Version) -> RemoteOperation {
        let doc = Document::from_draft(DocumentDraft::new("d1", "T", content), 1_000);
        RemoteOperation::new(kind, doc, base)
    }

    #[test]
    fn test_create_then_update() {
        let table = DocumentTable::new();
        assert_eq!(
            table.apply(op(OperationKind::Create, "a", 0)),
            RemoteOutcome::Applied { version: 1 }
        );
        assert_eq!(
            table.apply(op(OperationKind::Update, "b", 1)),
            RemoteOutcome::Applied { version: 2 }
        );

        let stored = table.get("d1").unwrap();
        assert_eq!(stored.version, 2);
        let doc = stored.document.unwrap();
        assert_eq!(doc.content, "b");
        assert!(!doc.is_dirty);
    }

    #[test]
    fn test_stale_base_conflicts_with_current_document() {
        let table = DocumentTable::new();
        table.apply(op(OperationKind::Create, "a", 0));
        table.apply(op(OperationKind::Update, "b", 1));

        match table.apply(op(OperationKind::Update, "c", 1)) {
            RemoteOutcome::Conflict { remote: Some(remote) } => {
                assert_eq!(remote.version, 2);
                assert_eq!(remote.content, "b");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(table.get("d1").unwrap().version, 2);
    }

    #[test]
    fn test_duplicate_create_conflicts() {
        let table = DocumentTable::new();
        table.apply(op(OperationKind::Create, "a", 0));
        assert!(matches!(
            table.apply(op(OperationKind::Create, "b", 0)),
            RemoteOutcome::Conflict { remote: Some(_) }
        ));
    }

    #[test]
    fn test_delete_leaves_tombstone_and_recreate_keeps_counting() {
        let table = DocumentTable::new();
        table.apply(op(OperationKind::Create, "a", 0));
        assert_eq!(
            table.apply(op(OperationKind::Delete, "a", 1)),
            RemoteOutcome::Applied { version: 2 }
        );
        assert!(table.get("d1").unwrap().document.is_none());

        assert_eq!(
            table.apply(op(OperationKind::Update, "b", 2)),
            RemoteOutcome::Conflict { remote: None }
        );
        assert_eq!(
            table.apply(op(OperationKind::Create, "again", 0)),
            RemoteOutcome::Applied { version: 3 }
        );
    }

    #[test]
    fn test_update_of_unknown_document_is_tombstone_conflict() {
        let table = DocumentTable::new();
        assert_eq!(
            table.apply(op(OperationKind::Update, "x", 3)),
            RemoteOutcome::Conflict { remote: None }
        );
        assert!(table.is_empty());
    }
}
