//! Persisted form of the sync queue.
//!
//! The queue is written as a single JSON document after every mutation so
//! pending work survives a crash or restart.

use crate::{error::Result, Error, ItemState, SyncQueueItem};
use serde::{Deserialize, Serialize};

/// Version of the queue snapshot format for future compatibility.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Last sequence number used for item ids
    pub next_seq: u64,
    /// Retry budget given to new items
    pub max_retries: u32,
    /// Items in enqueue order
    pub items: Vec<SyncQueueItem>,
}

impl QueueSnapshot {
    /// Create a snapshot in the current format.
    pub fn new(next_seq: u64, max_retries: u32, items: Vec<SyncQueueItem>) -> Self {
        Self {
            format_version: QUEUE_FORMAT_VERSION,
            next_seq,
            max_retries,
            items,
        }
    }

    /// Number of items not dead-lettered.
    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state != ItemState::DeadLettered)
            .count()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > QUEUE_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported queue format version: {} (max supported: {})",
                snapshot.format_version, QUEUE_FORMAT_VERSION
            )));
        }

        let max_seq = snapshot
            .items
            .iter()
            .filter_map(|item| item.id.rsplit_once(':'))
            .filter_map(|(_, seq)| seq.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        if max_seq > snapshot.next_seq {
            return Err(Error::InvalidSnapshot(format!(
                "item sequence {} is ahead of the queue sequence {}",
                max_seq, snapshot.next_seq
            )));
        }

        Ok(snapshot)
    }
}
