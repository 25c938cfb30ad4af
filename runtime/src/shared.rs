//! State shared by the auto-save controllers and the orchestrator.
//!
//! Every mutation that touches both the store and the queue runs under the
//! document's lock, then the queue lock, always in that order.

use crate::clock::Clock;
use crate::error::Result;
use crate::orchestrator::{Command, NetworkState};
use dashmap::DashMap;
use parking_lot::Mutex;
use quill_engine::{
    ConflictResolver, Document, DocumentDraft, DocumentId, DocumentStore, ItemState,
    OperationKind, Priority, RemoteOperation, RemoteOutcome, Resolution, ResolutionAction,
    RetryDecision, RetryPolicy, StoredVersion, SyncQueue, SyncQueueItem, SyncStatus,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How a drained item was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settled {
    Applied,
    Resolved(Resolution),
    /// The item no longer applied (stale behind a local delete, or already
    /// gone from the queue) and was dropped
    Superseded,
    Retrying(Duration),
    DeadLettered,
}

pub(crate) struct SyncCore {
    pub(crate) store: DocumentStore,
    queue: Mutex<SyncQueue>,
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
    resolver: ConflictResolver,
    retry: RetryPolicy,
    status: watch::Sender<SyncStatus>,
    commands: mpsc::UnboundedSender<Command>,
    pub(crate) clock: Clock,
    disposed: AtomicBool,
    /// Mirror of the orchestrator's state
    network: Mutex<NetworkState>,
    drain_cycles: AtomicU64,
}

impl SyncCore {
    pub(crate) fn new(
        store: DocumentStore,
        queue: SyncQueue,
        resolver: ConflictResolver,
        retry: RetryPolicy,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let mut status = SyncStatus::new();
        for item in queue.dead_letters() {
            status.fail_document(
                item.document_id.clone(),
                item.last_error.clone().unwrap_or_else(|| "dead-lettered".into()),
            );
        }
        status.pending_items = queue.pending_len();
        status.dead_letters = queue.dead_letters().len();
        let (status, _) = watch::channel(status);

        Self {
            store,
            queue: Mutex::new(queue),
            locks: DashMap::new(),
            resolver,
            retry,
            status,
            commands,
            clock: Clock::new(),
            disposed: AtomicBool::new(false),
            network: Mutex::new(NetworkState::Offline),
            drain_cycles: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn update_status(&self, change: impl FnOnce(&mut SyncStatus)) {
        self.status.send_modify(change);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn network_state(&self) -> NetworkState {
        *self.network.lock()
    }

    pub(crate) fn set_network_state(&self, state: NetworkState) {
        *self.network.lock() = state;
    }

    /// Count a drain cycle, returning its number.
    pub(crate) fn begin_drain(&self) -> u64 {
        self.drain_cycles.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn drain_cycles(&self) -> u64 {
        self.drain_cycles.load(Ordering::SeqCst)
    }

    /// Ask the orchestrator for a drain; coalesced if one is running.
    pub(crate) fn kick(&self) {
        let _ = self.commands.send(Command::Drain);
    }

    pub(crate) fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    fn document_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Write a local edit and enqueue exactly one operation for it.
    pub(crate) fn save(&self, draft: DocumentDraft, priority: Priority) -> Result<StoredVersion> {
        let lock = self.document_lock(&draft.id);
        let _guard = lock.lock();

        let now = self.clock.now_ms();
        let stored = self.store.put(draft, now)?;
        let kind = if stored.created {
            OperationKind::Create
        } else {
            OperationKind::Update
        };

        let mut queue = self.queue.lock();
        let enqueued = queue.enqueue(kind, stored.snapshot.clone(), priority, now);
        debug!(
            document_id = %stored.document_id,
            version = stored.version,
            item_id = %enqueued.item_id,
            collapsed = enqueued.collapsed,
            "saved locally"
        );
        let committed = self.commit(&queue);
        drop(queue);

        // The operation stays queued in memory; a failed write is recovered
        // from the dirty flag on the next start.
        self.kick();
        committed?;
        Ok(stored)
    }

    /// Tombstone a document and enqueue its delete.
    pub(crate) fn delete(&self, id: &str) -> Result<bool> {
        let lock = self.document_lock(id);
        let _guard = lock.lock();

        let now = self.clock.now_ms();
        let Some(intent) = self.store.delete(id, now)? else {
            return Ok(false);
        };

        let mut queue = self.queue.lock();
        queue.enqueue(OperationKind::Delete, intent.snapshot, Priority::Normal, now);
        let committed = self.commit(&queue);
        drop(queue);

        info!(document_id = %id, "deleted locally");
        self.kick();
        committed?;
        Ok(true)
    }

    /// Queue an operation for every dirty document that has none, such as an
    /// edit whose queue write failed before the last shutdown.
    pub(crate) fn recover_orphans(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut queue = self.queue.lock();

        let mut recovered = 0;
        for id in self.store.dirty_documents() {
            if queue.items_for(&id).next().is_some() {
                continue;
            }
            let Some(doc) = self.store.get_including_deleted(&id) else {
                continue;
            };
            let kind = if doc.deleted {
                OperationKind::Delete
            } else if doc.base_version == 0 {
                OperationKind::Create
            } else {
                OperationKind::Update
            };
            debug!(document_id = %id, version = doc.version, ?kind, "requeued unsynced document");
            queue.enqueue(kind, doc, Priority::Normal, now);
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "recovered documents missing from the sync queue");
            self.commit(&queue)?;
        }
        Ok(recovered)
    }

    /// Take the next items to send.
    pub(crate) fn next_batch(&self, max_items: usize) -> Vec<SyncQueueItem> {
        self.queue.lock().next_batch(max_items, self.clock.now_ms())
    }

    /// Earliest time a waiting item becomes drainable.
    pub(crate) fn next_ready_at(&self) -> Option<u64> {
        self.queue.lock().next_ready_at()
    }

    pub(crate) fn pending_items(&self) -> usize {
        self.queue.lock().pending_len()
    }

    /// The operation to send for `item`, based on the freshest remote version.
    pub(crate) fn operation_for(&self, item: &SyncQueueItem) -> RemoteOperation {
        let base_version = self.store.base_version(&item.document_id).unwrap_or(0);
        RemoteOperation::new(item.kind, item.payload.clone(), base_version)
    }

    /// Return an unsent item to the queue untouched.
    pub(crate) fn release(&self, item: &SyncQueueItem) {
        let mut queue = self.queue.lock();
        if let Err(e) = queue.release(&item.id) {
            debug!(item_id = %item.id, error = %e, "release skipped");
        }
    }

    pub(crate) fn release_all(&self) -> usize {
        self.queue.lock().release_all()
    }

    /// Record the remote's answer for a drained item.
    pub(crate) fn settle(&self, item: &SyncQueueItem, outcome: RemoteOutcome) -> Settled {
        let lock = self.document_lock(&item.document_id);
        let _guard = lock.lock();

        match outcome {
            RemoteOutcome::Applied { version } => self.applied(item, version),
            RemoteOutcome::Conflict { remote } => match self.resolve(item, remote) {
                Ok(settled) => settled,
                Err(e) => {
                    warn!(document_id = %item.document_id, error = %e, "conflict resolution failed");
                    self.failed(item, e.to_string())
                }
            },
            RemoteOutcome::Transient { message } => self.failed(item, message),
            RemoteOutcome::Rejected { message } => {
                let mut queue = self.queue.lock();
                if let Err(e) = queue.dead_letter(&item.id, message.clone()) {
                    debug!(item_id = %item.id, error = %e, "dead-letter skipped");
                }
                self.update_status(|s| s.fail_document(item.document_id.clone(), message.clone()));
                self.commit_or_warn(&queue);
                warn!(document_id = %item.document_id, item_id = %item.id, %message, "rejected by remote");
                Settled::DeadLettered
            }
        }
    }

    fn applied(&self, item: &SyncQueueItem, version: u64) -> Settled {
        let mut queue = self.queue.lock();
        queue.ack(&item.id);
        match self.store.confirm(&item.document_id, item.payload.version, version) {
            Ok(clean) => debug!(
                document_id = %item.document_id,
                local_version = item.payload.version,
                remote_version = version,
                clean,
                "applied remotely"
            ),
            Err(e) => warn!(document_id = %item.document_id, error = %e, "could not record confirmation"),
        }
        self.update_status(|s| s.clear_document(&item.document_id));
        self.commit_or_warn(&queue);
        Settled::Applied
    }

    fn failed(&self, item: &SyncQueueItem, message: String) -> Settled {
        let sample: f64 = rand::thread_rng().gen();
        let mut queue = self.queue.lock();
        let now = self.clock.now_ms();

        let settled = match queue.retry(&item.id, &self.retry, now, sample, message.clone()) {
            Ok(RetryDecision::Scheduled { retry_count, delay }) => {
                debug!(
                    document_id = %item.document_id,
                    item_id = %item.id,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    %message,
                    "retry scheduled"
                );
                Settled::Retrying(delay)
            }
            Ok(RetryDecision::DeadLettered { retry_count }) => {
                let error = format!("retries exhausted after {retry_count} attempts: {message}");
                warn!(document_id = %item.document_id, item_id = %item.id, %error, "dead-lettered");
                self.update_status(|s| s.fail_document(item.document_id.clone(), error));
                Settled::DeadLettered
            }
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "retry skipped");
                Settled::Superseded
            }
        };
        self.commit_or_warn(&queue);
        settled
    }

    fn resolve(&self, item: &SyncQueueItem, remote: Option<Document>) -> Result<Settled> {
        let id = &item.document_id;
        let local = self
            .store
            .get_including_deleted(id)
            .unwrap_or_else(|| item.payload.clone());

        // A stale edit queued before a local delete: drop it and let the
        // delete go out against the remote's version.
        if local.deleted && item.kind != OperationKind::Delete {
            if let Some(remote) = &remote {
                self.store.rebase(id, remote.version)?;
            }
            let mut queue = self.queue.lock();
            queue.ack(&item.id);
            self.commit_or_warn(&queue);
            debug!(document_id = %id, item_id = %item.id, "dropped edit superseded by local delete");
            return Ok(Settled::Superseded);
        }

        let resolution = self.resolver.resolve(item.kind, &local, remote.as_ref());
        info!(
            document_id = %id,
            local_version = local.version,
            remote_version = ?resolution.remote_value.as_ref().map(|r| r.version),
            resolution = ?resolution.resolution,
            policy = %self.resolver.policy(),
            "conflict resolved"
        );

        match resolution.action {
            ResolutionAction::Resend { kind, base_version } => {
                self.store.rebase(id, base_version)?;
                let mut queue = self.queue.lock();
                queue.reissue(&item.id, kind)?;
                self.commit_or_warn(&queue);
            }
            ResolutionAction::AdoptRemote(remote) => {
                self.store.adopt_remote(&remote)?;
                let mut queue = self.queue.lock();
                queue.discard_document(id);
                self.commit_or_warn(&queue);
            }
            ResolutionAction::AcceptDeletion => {
                self.store.accept_remote_delete(id, self.clock.now_ms())?;
                let mut queue = self.queue.lock();
                queue.discard_document(id);
                self.commit_or_warn(&queue);
            }
            ResolutionAction::Reapply { remote, edit } => {
                self.store.adopt_remote(&remote)?;
                let now = self.clock.now_ms();
                let stored = self.store.put(edit, now)?;

                // The replayed edit carries the newest local text, so every
                // older queued operation of the document is obsolete.
                let mut queue = self.queue.lock();
                queue.discard_document(id);
                queue.enqueue(OperationKind::Update, stored.snapshot, item.priority, now);
                self.commit_or_warn(&queue);
                drop(queue);
                self.kick();
            }
        }

        self.update_status(|s| s.clear_document(id));
        Ok(Settled::Resolved(resolution.resolution))
    }

    /// Give a dead-lettered item a fresh retry budget.
    pub(crate) fn requeue(&self, item_id: &str) -> Result<()> {
        let mut queue = self.queue.lock();
        queue.requeue(item_id)?;
        if let Some(item) = queue.get(item_id) {
            let document_id = item.document_id.clone();
            let still_dead = queue
                .items_for(&document_id)
                .any(|i| i.state == ItemState::DeadLettered);
            if !still_dead {
                self.update_status(|s| s.clear_document(&document_id));
            }
        }
        let committed = self.commit(&queue);
        drop(queue);

        self.kick();
        committed
    }

    /// Drop every queued operation of a document.
    pub(crate) fn discard(&self, document_id: &str) -> Vec<SyncQueueItem> {
        let lock = self.document_lock(document_id);
        let _guard = lock.lock();

        let mut queue = self.queue.lock();
        let discarded = queue.discard_document(document_id);
        self.update_status(|s| s.clear_document(document_id));
        self.commit_or_warn(&queue);
        discarded
    }

    pub(crate) fn dead_letters(&self) -> Vec<SyncQueueItem> {
        self.queue
            .lock()
            .dead_letters()
            .into_iter()
            .cloned()
            .collect()
    }

    pub(crate) fn queued_items(&self) -> Vec<SyncQueueItem> {
        self.queue.lock().items().to_vec()
    }

    /// Persist the queue and publish its depth. Called with the queue locked.
    fn commit(&self, queue: &SyncQueue) -> Result<()> {
        let pending = queue.pending_len();
        let dead = queue.dead_letters().len();
        self.update_status(|s| {
            s.pending_items = pending;
            s.dead_letters = dead;
        });

        let json = queue.export_state().to_json()?;
        self.store.backend().write_queue(json.as_bytes())?;
        Ok(())
    }

    /// [`commit`](Self::commit) for settle paths, where the remote already
    /// acted and the in-memory queue stays authoritative.
    fn commit_or_warn(&self, queue: &SyncQueue) {
        if let Err(e) = self.commit(queue) {
            warn!(error = %e, "failed to persist sync queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_engine::{
        error::StoreResult, ConflictPolicy, MemoryBackend, StorageBackend, StoreError,
    };

    /// Memory backend whose queue writes can be switched off.
    #[derive(Default)]
    struct QueueWriteFails {
        inner: MemoryBackend,
        failing: AtomicBool,
    }

    impl StorageBackend for QueueWriteFails {
        fn write_document(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
            self.inner.write_document(id, bytes)
        }

        fn load_documents(&self) -> StoreResult<Vec<Vec<u8>>> {
            self.inner.load_documents()
        }

        fn write_queue(&self, bytes: &[u8]) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk unplugged".into()));
            }
            self.inner.write_queue(bytes)
        }

        fn load_queue(&self) -> StoreResult<Option<Vec<u8>>> {
            self.inner.load_queue()
        }
    }

    fn core_on(backend: Arc<dyn StorageBackend>) -> SyncCore {
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = DocumentStore::open(backend.clone()).unwrap();
        let queue = match backend.load_queue().unwrap() {
            Some(raw) => {
                let json = std::str::from_utf8(&raw).unwrap();
                SyncQueue::import_state(quill_engine::QueueSnapshot::from_json(json).unwrap())
            }
            None => SyncQueue::new(3),
        };
        SyncCore::new(store, queue, ConflictResolver::default(), RetryPolicy::default(), tx)
    }

    fn new_core(
        policy: ConflictPolicy,
        max_retries: u32,
    ) -> (SyncCore, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = SyncCore::new(
            DocumentStore::in_memory(),
            SyncQueue::new(max_retries),
            ConflictResolver::new(policy),
            RetryPolicy::new(max_retries).with_jitter(0.0),
            tx,
        );
        (core, rx)
    }

    fn draft(id: &str, content: &str) -> DocumentDraft {
        DocumentDraft::new(id, "Title", content)
    }

    #[tokio::test]
    async fn save_enqueues_once_and_kicks() {
        let (core, mut rx) = new_core(ConflictPolicy::default(), 3);
        core.save(draft("d1", "a"), Priority::Normal).unwrap();
        core.save(draft("d1", "ab"), Priority::Normal).unwrap();

        assert_eq!(core.pending_items(), 1);
        assert_eq!(core.status().pending_items, 1);
        assert!(matches!(rx.try_recv(), Ok(Command::Drain)));

        let items = core.queued_items();
        assert_eq!(items[0].kind, OperationKind::Create);
        assert_eq!(items[0].payload.content, "ab");
    }

    #[tokio::test]
    async fn queue_is_persisted_on_every_change() {
        let backend = Arc::new(MemoryBackend::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let core = SyncCore::new(
            DocumentStore::new(backend.clone()),
            SyncQueue::new(3),
            ConflictResolver::default(),
            RetryPolicy::default(),
            tx,
        );

        core.save(draft("d1", "a"), Priority::High).unwrap();
        let raw = backend.load_queue().unwrap().unwrap();
        let json = std::str::from_utf8(&raw).unwrap();
        let snapshot = quill_engine::QueueSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.items.len(), 1);
    }

    #[tokio::test]
    async fn applied_confirms_and_cleans() {
        let (core, _rx) = new_core(ConflictPolicy::default(), 3);
        core.save(draft("d1", "a"), Priority::Normal).unwrap();

        let item = core.next_batch(10).remove(0);
        assert_eq!(core.operation_for(&item).base_version, 0);
        assert_eq!(core.settle(&item, RemoteOutcome::Applied { version: 1 }), Settled::Applied);

        let doc = core.store.get("d1").unwrap();
        assert!(!doc.is_dirty);
        assert_eq!(doc.base_version, 1);
        assert_eq!(core.pending_items(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transient_failures_dead_letter_after_budget() {
        let (core, _rx) = new_core(ConflictPolicy::default(), 1);
        core.save(draft("d1", "a"), Priority::Normal).unwrap();

        let item = core.next_batch(10).remove(0);
        assert!(matches!(
            core.settle(&item, RemoteOutcome::transient("503")),
            Settled::Retrying(_)
        ));
        assert!(core.next_batch(10).is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let item = core.next_batch(10).remove(0);
        assert_eq!(
            core.settle(&item, RemoteOutcome::transient("503")),
            Settled::DeadLettered
        );

        let status = core.status();
        assert_eq!(status.pending_items, 0);
        assert_eq!(status.dead_letters, 1);
        assert!(status.document_errors["d1"].contains("retries exhausted"));
    }

    #[tokio::test]
    async fn rejection_is_fatal_for_the_document() {
        let (core, _rx) = new_core(ConflictPolicy::default(), 5);
        core.save(draft("d1", "a"), Priority::Normal).unwrap();

        let item = core.next_batch(10).remove(0);
        assert_eq!(
            core.settle(&item, RemoteOutcome::rejected("forbidden")),
            Settled::DeadLettered
        );
        assert_eq!(core.status().error.as_deref(), Some("forbidden"));

        core.requeue(&item.id).unwrap();
        assert_eq!(core.status().error, None);
        assert_eq!(core.next_batch(10).len(), 1);
    }

    #[tokio::test]
    async fn remote_policy_adopts_snapshot() {
        let (core, _rx) = new_core(ConflictPolicy::Remote, 5);
        for content in ["a", "b", "c"] {
            core.save(draft("d1", content), Priority::Normal).unwrap();
        }
        let item = core.next_batch(10).remove(0);

        let mut remote = core.store.get("d1").unwrap();
        remote.version = 5;
        remote.content = "theirs".into();

        let settled = core.settle(&item, RemoteOutcome::Conflict { remote: Some(remote) });
        assert_eq!(settled, Settled::Resolved(Resolution::Remote));

        let doc = core.store.get("d1").unwrap();
        assert_eq!(doc.version, 5);
        assert!(!doc.is_dirty);
        assert_eq!(core.pending_items(), 0);
    }

    #[tokio::test]
    async fn default_policy_requeues_local_text() {
        let (core, _rx) = new_core(ConflictPolicy::RemoteThenRequeue, 5);
        core.save(draft("d1", "mine"), Priority::Normal).unwrap();
        let item = core.next_batch(10).remove(0);

        let mut remote = item.payload.clone();
        remote.version = 4;
        remote.content = "theirs".into();
        core.settle(&item, RemoteOutcome::Conflict { remote: Some(remote) });

        let doc = core.store.get("d1").unwrap();
        assert_eq!(doc.content, "mine");
        assert_eq!(doc.base_version, 4);
        assert!(doc.is_dirty);

        let next = core.next_batch(10).remove(0);
        assert_eq!(next.kind, OperationKind::Update);
        assert_eq!(core.operation_for(&next).base_version, 4);
    }

    #[tokio::test]
    async fn stale_edit_behind_local_delete_is_dropped() {
        let (core, _rx) = new_core(ConflictPolicy::default(), 5);
        core.save(draft("d1", "a"), Priority::Normal).unwrap();
        let create = core.next_batch(10).remove(0);
        core.settle(&create, RemoteOutcome::Applied { version: 1 });

        core.save(draft("d1", "b"), Priority::Normal).unwrap();
        let update = core.next_batch(10).remove(0);
        core.delete("d1").unwrap();

        let mut remote = update.payload.clone();
        remote.version = 3;
        let settled = core.settle(&update, RemoteOutcome::Conflict { remote: Some(remote) });
        assert_eq!(settled, Settled::Superseded);

        let delete = core.next_batch(10).remove(0);
        assert_eq!(delete.kind, OperationKind::Delete);
        assert_eq!(core.operation_for(&delete).base_version, 3);
    }

    #[tokio::test]
    async fn save_reports_failed_queue_write() {
        let backend = Arc::new(QueueWriteFails::default());
        backend.failing.store(true, Ordering::SeqCst);
        let core = core_on(backend.clone());

        let err = core.save(draft("d1", "a"), Priority::Normal).unwrap_err();
        assert!(matches!(err, crate::SyncError::Store(StoreError::Backend(_))));
        // The document itself was written and the edit is still queued here.
        assert!(core.store.get("d1").unwrap().is_dirty);
        assert_eq!(core.pending_items(), 1);
        assert_eq!(backend.inner.raw_queue(), None);
    }

    #[tokio::test]
    async fn dirty_documents_without_items_are_requeued() {
        let backend = Arc::new(QueueWriteFails::default());
        {
            let core = core_on(backend.clone());
            core.save(draft("synced", "a"), Priority::Normal).unwrap();
            let item = core.next_batch(10).remove(0);
            core.settle(&item, RemoteOutcome::Applied { version: 1 });

            backend.failing.store(true, Ordering::SeqCst);
            core.save(draft("synced", "b"), Priority::Normal).unwrap_err();
            core.save(draft("fresh", "c"), Priority::Normal).unwrap_err();
        }
        backend.failing.store(false, Ordering::SeqCst);

        let core = core_on(backend.clone());
        assert_eq!(core.pending_items(), 0);
        assert_eq!(core.recover_orphans().unwrap(), 2);
        assert_eq!(core.recover_orphans().unwrap(), 0);

        let items = core.queued_items();
        let kind_of = |id: &str| items.iter().find(|i| i.document_id == id).unwrap().kind;
        assert_eq!(kind_of("fresh"), OperationKind::Create);
        assert_eq!(kind_of("synced"), OperationKind::Update);
        assert!(backend.inner.raw_queue().is_some());
    }
}
