//! Sync queue - pending remote operations, in enqueue order.
//!
//! # Ordering
//!
//! Items live in a single list in the order they were enqueued. Only the
//! oldest item of each document (its *head*) may be handed out for draining,
//! and only while no other item of that document is in flight. This gives
//! FIFO-per-document delivery no matter how items are prioritised.
//!
//! Across documents, heads are ordered by [`Priority`] (high first), then by
//! enqueue order.
//!
//! # Collapsing
//!
//! An `update` enqueued while the document's newest item is still an untouched
//! `create` or `update` replaces that item's payload instead of appending, so
//! intermediate states are never sent.

use crate::{
    error::{Error, Result},
    snapshot::QueueSnapshot,
    Document, DocumentId, ItemId, OperationKind, RetryPolicy, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;

/// Drain priority hint. Orders documents against each other, never items of
/// the same document.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    /// Waiting to be drained (possibly after a backoff delay)
    Pending,
    /// Handed out by [`SyncQueue::next_batch`] and not yet settled
    InFlight,
    /// Out of retry budget or rejected; waits for explicit user action
    DeadLettered,
}

/// A pending remote operation derived from a document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub document_id: DocumentId,
    /// Snapshot of the document at enqueue time
    pub payload: Document,
    /// Enqueue time (milliseconds since epoch)
    pub timestamp: Timestamp,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    pub state: ItemState,
    /// Earliest redrive time after a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<Timestamp>,
    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// True when the item can be drained at `now`.
    pub fn is_ready(&self, now: Timestamp) -> bool {
        self.state == ItemState::Pending && self.not_before.map_or(true, |t| t <= now)
    }

    fn can_absorb(&self, kind: OperationKind) -> bool {
        kind == OperationKind::Update
            && self.state == ItemState::Pending
            && self.retry_count == 0
            && matches!(self.kind, OperationKind::Create | OperationKind::Update)
    }
}

/// Result of [`SyncQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub item_id: ItemId,
    /// True when the payload was folded into an existing item
    pub collapsed: bool,
}

/// What happened to an item after a failed drain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back in the queue; redrive after `delay`
    Scheduled { retry_count: u32, delay: Duration },
    /// Retry budget exhausted
    DeadLettered { retry_count: u32 },
}

/// The ordered queue of pending remote operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncQueue {
    items: Vec<SyncQueueItem>,
    next_seq: u64,
    max_retries: u32,
}

impl SyncQueue {
    /// Create an empty queue whose new items get `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: Vec::new(),
            next_seq: 0,
            max_retries,
        }
    }

    /// Append an operation for `payload`'s document.
    ///
    /// The queue keeps its own copy of `payload`.
    pub fn enqueue(
        &mut self,
        kind: OperationKind,
        payload: Document,
        priority: Priority,
        now: Timestamp,
    ) -> Enqueued {
        if let Some(newest) = self
            .items
            .iter_mut()
            .rev()
            .find(|item| item.document_id == payload.id)
        {
            if newest.can_absorb(kind) {
                newest.payload = payload;
                newest.timestamp = now;
                newest.priority = newest.priority.max(priority);
                return Enqueued {
                    item_id: newest.id.clone(),
                    collapsed: true,
                };
            }
        }

        self.next_seq += 1;
        let item = SyncQueueItem {
            id: format!("{}:{}", payload.id, self.next_seq),
            kind,
            document_id: payload.id.clone(),
            payload,
            timestamp: now,
            retry_count: 0,
            max_retries: self.max_retries,
            priority,
            state: ItemState::Pending,
            not_before: None,
            last_error: None,
        };
        let item_id = item.id.clone();
        self.items.push(item);

        Enqueued {
            item_id,
            collapsed: false,
        }
    }

    /// Hand out up to `max_items` drainable items and mark them in flight.
    ///
    /// At most one item per document is returned: the document's head, and
    /// only if nothing of that document is already in flight.
    pub fn next_batch(&mut self, max_items: usize, now: Timestamp) -> Vec<SyncQueueItem> {
        let mut candidates: Vec<usize> = {
            let mut seen: HashSet<&str> = HashSet::new();
            self.items
                .iter()
                .enumerate()
                .filter(|(_, item)| seen.insert(item.document_id.as_str()))
                .filter(|(_, item)| item.is_ready(now))
                .map(|(idx, _)| idx)
                .collect()
        };

        candidates.sort_by_key(|&idx| (Reverse(self.items[idx].priority), idx));
        candidates.truncate(max_items);

        candidates
            .into_iter()
            .map(|idx| {
                let item = &mut self.items[idx];
                item.state = ItemState::InFlight;
                item.clone()
            })
            .collect()
    }

    /// Remove an item after the remote applied it.
    pub fn ack(&mut self, item_id: &str) -> Option<SyncQueueItem> {
        let idx = self.position(item_id)?;
        Some(self.items.remove(idx))
    }

    /// Count a failed attempt and schedule a redrive, or dead-letter the item
    /// once `retry_count` exceeds `max_retries`.
    ///
    /// `sample` is the jitter sample handed to [`RetryPolicy::delay_for`].
    pub fn retry(
        &mut self,
        item_id: &str,
        policy: &RetryPolicy,
        now: Timestamp,
        sample: f64,
        error: impl Into<String>,
    ) -> Result<RetryDecision> {
        let item = self.item_mut(item_id)?;
        let attempts_before = item.retry_count;
        item.retry_count += 1;
        item.last_error = Some(error.into());

        if item.retry_count > item.max_retries {
            item.state = ItemState::DeadLettered;
            item.not_before = None;
            return Ok(RetryDecision::DeadLettered {
                retry_count: item.retry_count,
            });
        }

        let delay = policy.delay_for(attempts_before, sample);
        item.state = ItemState::Pending;
        item.not_before = Some(now + delay.as_millis() as u64);
        Ok(RetryDecision::Scheduled {
            retry_count: item.retry_count,
            delay,
        })
    }

    /// Dead-letter an item immediately (permission or auth rejection).
    pub fn dead_letter(&mut self, item_id: &str, error: impl Into<String>) -> Result<()> {
        let item = self.item_mut(item_id)?;
        item.state = ItemState::DeadLettered;
        item.not_before = None;
        item.last_error = Some(error.into());
        Ok(())
    }

    /// Return an in-flight item to pending without spending retry budget.
    pub fn release(&mut self, item_id: &str) -> Result<()> {
        let item = self.item_mut(item_id)?;
        if item.state == ItemState::InFlight {
            item.state = ItemState::Pending;
        }
        Ok(())
    }

    /// Return every in-flight item to pending.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for item in &mut self.items {
            if item.state == ItemState::InFlight {
                item.state = ItemState::Pending;
                released += 1;
            }
        }
        released
    }

    /// Send an item again as `kind`, immediately, keeping its retry count.
    pub fn reissue(&mut self, item_id: &str, kind: OperationKind) -> Result<()> {
        let item = self.item_mut(item_id)?;
        item.kind = kind;
        item.state = ItemState::Pending;
        item.not_before = None;
        Ok(())
    }

    /// Give a dead-lettered item a fresh retry budget (manual retry).
    pub fn requeue(&mut self, item_id: &str) -> Result<()> {
        let item = self.item_mut(item_id)?;
        if item.state != ItemState::DeadLettered {
            return Err(Error::NotDeadLettered(item_id.to_string()));
        }
        item.state = ItemState::Pending;
        item.retry_count = 0;
        item.not_before = None;
        item.last_error = None;
        Ok(())
    }

    /// Drop every item of a document, returning them in enqueue order.
    pub fn discard_document(&mut self, document_id: &str) -> Vec<SyncQueueItem> {
        let (discarded, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| item.document_id == document_id);
        self.items = kept;
        discarded
    }

    /// Get an item by id.
    pub fn get(&self, item_id: &str) -> Option<&SyncQueueItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// All items in enqueue order.
    pub fn items(&self) -> &[SyncQueueItem] {
        &self.items
    }

    /// Items of one document in enqueue order.
    pub fn items_for<'a>(
        &'a self,
        document_id: &'a str,
    ) -> impl Iterator<Item = &'a SyncQueueItem> + 'a {
        self.items
            .iter()
            .filter(move |item| item.document_id == document_id)
    }

    /// Dead-lettered items in enqueue order.
    pub fn dead_letters(&self) -> Vec<&SyncQueueItem> {
        self.items
            .iter()
            .filter(|item| item.state == ItemState::DeadLettered)
            .collect()
    }

    /// Items still in active draining (pending or in flight).
    pub fn pending_len(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state != ItemState::DeadLettered)
            .count()
    }

    /// Earliest time a pending head becomes drainable, if any is waiting.
    pub fn next_ready_at(&self) -> Option<Timestamp> {
        let mut seen: HashSet<&str> = HashSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert(item.document_id.as_str()))
            .filter(|item| item.state == ItemState::Pending)
            .map(|item| item.not_before.unwrap_or(0))
            .min()
    }

    /// Total number of items, dead letters included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue holds no items at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Export the queue for persistence.
    pub fn export_state(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.next_seq, self.max_retries, self.items.clone())
    }

    /// Rebuild a queue from a snapshot.
    ///
    /// Items that were in flight when the snapshot was taken return to pending:
    /// their outcome is unknown, and the remote contract tolerates a resend.
    pub fn import_state(snapshot: QueueSnapshot) -> Self {
        let mut items = snapshot.items;
        for item in &mut items {
            if item.state == ItemState::InFlight {
                item.state = ItemState::Pending;
            }
        }
        Self {
            items,
            next_seq: snapshot.next_seq,
            max_retries: snapshot.max_retries,
        }
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == item_id)
    }

    fn item_mut(&mut self, item_id: &str) -> Result<&mut SyncQueueItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| Error::UnknownItem(item_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentDraft;

    fn doc(id: &str, content: &str, version: u64) -> Document {
        let mut doc = Document::from_draft(DocumentDraft::new(id, "Title", content), 1000);
        doc.version = version;
        doc
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(2)
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.0)
    }

    #[test]
    fn enqueue_assigns_unique_ids() {
        let mut queue = SyncQueue::new(3);
        let a = queue.enqueue(OperationKind::Create, doc("a", "x", 1), Priority::Normal, 1);
        let b = queue.enqueue(OperationKind::Create, doc("b", "x", 1), Priority::Normal, 2);

        assert_ne!(a.item_id, b.item_id);
        assert!(!a.collapsed);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn updates_collapse_into_unsent_item() {
        let mut queue = SyncQueue::new(3);
        let first = queue.enqueue(OperationKind::Create, doc("a", "v1", 1), Priority::Low, 1);
        let second = queue.enqueue(OperationKind::Update, doc("a", "v2", 2), Priority::High, 2);

        assert!(second.collapsed);
        assert_eq!(first.item_id, second.item_id);
        assert_eq!(queue.len(), 1);

        let item = &queue.items()[0];
        assert_eq!(item.kind, OperationKind::Create);
        assert_eq!(item.payload.content, "v2");
        assert_eq!(item.priority, Priority::High);
    }

    #[test]
    fn update_does_not_collapse_into_in_flight_item() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Update, doc("a", "v1", 1), Priority::Normal, 1);
        let batch = queue.next_batch(10, 1);
        assert_eq!(batch.len(), 1);

        let second = queue.enqueue(OperationKind::Update, doc("a", "v2", 2), Priority::Normal, 2);
        assert!(!second.collapsed);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.items()[0].payload.content, "v1");
    }

    #[test]
    fn delete_never_collapses() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Update, doc("a", "v1", 1), Priority::Normal, 1);
        let delete = queue.enqueue(OperationKind::Delete, doc("a", "v1", 2), Priority::Normal, 2);

        assert!(!delete.collapsed);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn batch_holds_back_second_item_of_a_document() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Create, doc("a", "v1", 1), Priority::Normal, 1);
        queue.enqueue(OperationKind::Delete, doc("a", "v1", 2), Priority::High, 2);

        let batch = queue.next_batch(10, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, OperationKind::Create);

        // Head still in flight: nothing for "a"
        assert!(queue.next_batch(10, 10).is_empty());

        queue.ack(&batch[0].id).unwrap();
        let batch = queue.next_batch(10, 10);
        assert_eq!(batch[0].kind, OperationKind::Delete);
    }

    #[test]
    fn batch_orders_documents_by_priority_then_age() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Create, doc("low", "x", 1), Priority::Low, 1);
        queue.enqueue(OperationKind::Create, doc("n1", "x", 1), Priority::Normal, 2);
        queue.enqueue(OperationKind::Create, doc("high", "x", 1), Priority::High, 3);
        queue.enqueue(OperationKind::Create, doc("n2", "x", 1), Priority::Normal, 4);

        let order: Vec<_> = queue
            .next_batch(10, 10)
            .into_iter()
            .map(|item| item.document_id)
            .collect();
        assert_eq!(order, vec!["high", "n1", "n2", "low"]);
    }

    #[test]
    fn batch_respects_max_items() {
        let mut queue = SyncQueue::new(3);
        for i in 0..5 {
            let payload = doc(&format!("d{i}"), "x", 1);
            queue.enqueue(OperationKind::Create, payload, Priority::Normal, i);
        }

        assert_eq!(queue.next_batch(2, 10).len(), 2);
        assert_eq!(queue.next_batch(10, 10).len(), 3);
    }

    #[test]
    fn retry_schedules_with_backoff() {
        let mut queue = SyncQueue::new(2);
        let id = queue
            .enqueue(OperationKind::Update, doc("a", "x", 1), Priority::Normal, 0)
            .item_id;
        queue.next_batch(1, 0);

        let decision = queue.retry(&id, &no_jitter(), 1000, 0.5, "timeout").unwrap();
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                retry_count: 1,
                delay: Duration::from_millis(100)
            }
        );

        // Not drainable until the delay has passed
        assert!(queue.next_batch(1, 1050).is_empty());
        assert_eq!(queue.next_ready_at(), Some(1100));
        assert_eq!(queue.next_batch(1, 1100).len(), 1);

        let decision = queue.retry(&id, &no_jitter(), 2000, 0.5, "timeout").unwrap();
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                retry_count: 2,
                delay: Duration::from_millis(200)
            }
        );
    }

    #[test]
    fn retry_dead_letters_after_budget() {
        let mut queue = SyncQueue::new(2);
        let id = queue
            .enqueue(OperationKind::Update, doc("a", "x", 1), Priority::Normal, 0)
            .item_id;

        // max_retries + 1 failures
        let mut last = None;
        for attempt in 0..3u64 {
            let now = attempt * 10_000;
            assert_eq!(queue.next_batch(1, now).len(), 1);
            last = Some(queue.retry(&id, &no_jitter(), now, 0.0, "down").unwrap());
        }

        assert_eq!(last, Some(RetryDecision::DeadLettered { retry_count: 3 }));
        assert!(queue.next_batch(1, u64::MAX).is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.dead_letters()[0].last_error.as_deref(), Some("down"));
    }

    #[test]
    fn dead_letter_holds_back_later_items_until_requeued() {
        let mut queue = SyncQueue::new(0);
        let first = queue
            .enqueue(OperationKind::Update, doc("a", "v1", 1), Priority::Normal, 0)
            .item_id;
        queue.enqueue(OperationKind::Delete, doc("a", "v1", 2), Priority::Normal, 1);

        queue.next_batch(10, 0);
        queue.dead_letter(&first, "forbidden").unwrap();
        assert!(queue.next_batch(10, 0).is_empty());

        assert!(matches!(
            queue.requeue("a:2"),
            Err(Error::NotDeadLettered(_))
        ));
        queue.requeue(&first).unwrap();
        let batch = queue.next_batch(10, 0);
        assert_eq!(batch[0].id, first);
        assert_eq!(batch[0].retry_count, 0);
    }

    #[test]
    fn release_and_reissue() {
        let mut queue = SyncQueue::new(3);
        let id = queue
            .enqueue(OperationKind::Update, doc("a", "x", 1), Priority::Normal, 0)
            .item_id;
        queue.next_batch(1, 0);
        assert_eq!(queue.release_all(), 1);
        assert_eq!(queue.get(&id).unwrap().state, ItemState::Pending);

        queue.next_batch(1, 0);
        queue.reissue(&id, OperationKind::Create).unwrap();
        let item = queue.get(&id).unwrap();
        assert_eq!(item.kind, OperationKind::Create);
        assert_eq!(item.state, ItemState::Pending);
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn discard_document_keeps_others() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Create, doc("a", "x", 1), Priority::Normal, 0);
        queue.enqueue(OperationKind::Create, doc("b", "x", 1), Priority::Normal, 1);
        queue.enqueue(OperationKind::Delete, doc("a", "x", 2), Priority::Normal, 2);

        let discarded = queue.discard_document("a");
        assert_eq!(discarded.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.items()[0].document_id, "b");
    }

    #[test]
    fn unknown_items() {
        let mut queue = SyncQueue::new(3);
        assert!(queue.ack("nope").is_none());
        assert!(matches!(
            queue.retry("nope", &no_jitter(), 0, 0.0, "x"),
            Err(Error::UnknownItem(_))
        ));
    }

    #[test]
    fn import_returns_in_flight_items_to_pending() {
        let mut queue = SyncQueue::new(3);
        queue.enqueue(OperationKind::Create, doc("a", "x", 1), Priority::Normal, 0);
        queue.next_batch(1, 0);

        let restored = SyncQueue::import_state(queue.export_state());
        assert_eq!(restored.items()[0].state, ItemState::Pending);

        // Sequence continues after restore
        let mut restored = restored;
        let next = restored.enqueue(OperationKind::Create, doc("b", "x", 1), Priority::Normal, 1);
        assert_eq!(next.item_id, "b:2");
    }
}
