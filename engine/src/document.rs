//! Document types for local persistence.

use crate::{DocumentId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// Descriptive data kept alongside a document's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Whitespace-separated words in the content
    pub word_count: usize,
    /// Unicode scalar values in the content
    pub character_count: usize,
    /// BCP 47 language tag of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Author of the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collaborators: Vec<String>,
}

impl DocumentMetadata {
    /// Recompute the derived counts for `content`.
    pub fn recount(&mut self, content: &str) {
        self.word_count = content.split_whitespace().count();
        self.character_count = content.chars().count();
    }
}

/// An edit captured from the editing surface, not yet written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDraft {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    /// Replacement metadata; `None` keeps whatever is already stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl DocumentDraft {
    /// Create a draft carrying only title and content.
    pub fn new(
        id: impl Into<DocumentId>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach metadata to the draft.
    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<&Document> for DocumentDraft {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            content: document.content.clone(),
            metadata: Some(document.metadata.clone()),
        }
    }
}

/// A document as stored on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Stable identifier
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    /// Local version, incremented on every accepted write
    pub version: Version,
    /// Last version confirmed by the remote store (0 when never synced)
    #[serde(default)]
    pub base_version: Version,
    /// Time of the most recent local write (milliseconds since epoch)
    pub last_modified: Timestamp,
    /// True until the remote confirms `version`
    pub is_dirty: bool,
    /// Soft delete flag (tombstone)
    #[serde(default)]
    pub deleted: bool,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Create version 1 of a document from a draft.
    pub fn from_draft(draft: DocumentDraft, timestamp: Timestamp) -> Self {
        let mut metadata = draft.metadata.unwrap_or_default();
        metadata.recount(&draft.content);

        Self {
            id: draft.id,
            title: draft.title,
            content: draft.content,
            version: 1,
            base_version: 0,
            last_modified: timestamp,
            is_dirty: true,
            deleted: false,
            metadata,
        }
    }

    /// Check if document is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Apply a local edit: new text, version + 1, dirty.
    ///
    /// Applying a draft to a tombstone brings the document back.
    pub fn apply_draft(&mut self, draft: DocumentDraft, timestamp: Timestamp) {
        self.title = draft.title;
        self.content = draft.content;
        if let Some(metadata) = draft.metadata {
            self.metadata = metadata;
        }
        self.metadata.recount(&self.content);
        self.version += 1;
        self.last_modified = timestamp;
        self.is_dirty = true;
        self.deleted = false;
    }

    /// Mark document as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.version += 1;
        self.last_modified = timestamp;
        self.is_dirty = true;
    }

    /// Approximate encoded size, used for capacity accounting.
    pub fn approximate_size(&self) -> usize {
        self.id.len() + self.title.len() + self.content.len()
    }
}
