//! Per-document auto-save controller task.
//!
//! Wraps the [`AutoSave`] state machine with real timers: the debounce timer,
//! the periodic flush timer and the error display timer. Writes run on the
//! blocking pool so a slow disk never stalls the editor's event stream.

use crate::error::{Result, SyncError};
use crate::shared::SyncCore;
use quill_engine::{
    AutoSave, AutoSaveConfig, Directives, DocumentDraft, DocumentId, Priority, SaveSnapshot,
    Version,
};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, warn};

type FlushResult = std::result::Result<Version, String>;

enum EditorEvent {
    Change { title: String, content: String },
    Force(oneshot::Sender<SaveSnapshot>),
    Close(oneshot::Sender<SaveSnapshot>),
}

/// Cloneable handle to one open document's auto-save task.
#[derive(Debug, Clone)]
pub struct AutoSaveHandle {
    document_id: DocumentId,
    events: mpsc::UnboundedSender<EditorEvent>,
    save_state: watch::Receiver<SaveSnapshot>,
}

impl AutoSaveHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Feed a content or title change.
    pub fn on_change(&self, title: impl Into<String>, content: impl Into<String>) -> Result<()> {
        self.events
            .send(EditorEvent::Change {
                title: title.into(),
                content: content.into(),
            })
            .map_err(|_| SyncError::Disposed)
    }

    /// Flush now and wait until no write is in flight.
    pub async fn save_now(&self) -> Result<SaveSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(EditorEvent::Force(tx))
            .map_err(|_| SyncError::Disposed)?;
        rx.await.map_err(|_| SyncError::Disposed)
    }

    pub fn save_state(&self) -> SaveSnapshot {
        self.save_state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveSnapshot> {
        self.save_state.clone()
    }
}

/// The running controller task and its handle.
#[derive(Debug)]
pub(crate) struct AutoSaveTask {
    pub(crate) handle: AutoSaveHandle,
    task: JoinHandle<()>,
}

impl AutoSaveTask {
    pub(crate) fn spawn(
        core: Arc<SyncCore>,
        document_id: DocumentId,
        config: AutoSaveConfig,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, save_state) = watch::channel(AutoSave::new(config).snapshot());
        let controller = Controller {
            core,
            document_id: document_id.clone(),
            machine: AutoSave::new(config),
            events: rx,
            state: state_tx,
            flush: None,
            waiters: Vec::new(),
            closing: None,
        };
        let task = tokio::spawn(controller.run());

        Self {
            handle: AutoSaveHandle {
                document_id,
                events,
                save_state,
            },
            task,
        }
    }

    /// Final best-effort flush, then stop the timers.
    pub(crate) async fn close(self) -> Result<SaveSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .events
            .send(EditorEvent::Close(tx))
            .map_err(|_| SyncError::Disposed)?;
        let snapshot = rx.await.map_err(|_| SyncError::Disposed)?;
        let _ = self.task.await;
        Ok(snapshot)
    }
}

struct Controller {
    core: Arc<SyncCore>,
    document_id: DocumentId,
    machine: AutoSave,
    events: mpsc::UnboundedReceiver<EditorEvent>,
    state: watch::Sender<SaveSnapshot>,
    flush: Option<JoinHandle<FlushResult>>,
    /// Callers of `save_now` waiting for the flush to finish
    waiters: Vec<oneshot::Sender<SaveSnapshot>>,
    closing: Option<Option<oneshot::Sender<SaveSnapshot>>>,
}

impl Controller {
    async fn run(mut self) {
        let config = *self.machine.config();
        let mut debounce: Pin<Box<Sleep>> = Box::pin(tokio::time::sleep(config.debounce));
        let mut debounce_armed = false;
        let mut error_clear: Pin<Box<Sleep>> = Box::pin(tokio::time::sleep(config.error_window));
        let mut error_armed = false;
        let mut periodic =
            tokio::time::interval_at(Instant::now() + config.periodic, config.periodic);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let directives = tokio::select! {
                event = self.events.recv(), if self.closing.is_none() => match event {
                    Some(EditorEvent::Change { title, content }) => {
                        let draft = DocumentDraft::new(self.document_id.clone(), title, content);
                        self.machine.on_change(draft)
                    }
                    Some(EditorEvent::Force(waiter)) => {
                        self.waiters.push(waiter);
                        self.machine.force()
                    }
                    Some(EditorEvent::Close(waiter)) => {
                        self.closing = Some(Some(waiter));
                        self.machine.force()
                    }
                    // Every handle dropped: close without anyone to answer
                    None => {
                        self.closing = Some(None);
                        self.machine.force()
                    }
                },
                _ = debounce.as_mut(), if debounce_armed => {
                    debounce_armed = false;
                    self.machine.on_debounce_elapsed()
                }
                _ = periodic.tick() => self.machine.on_periodic_tick(),
                _ = error_clear.as_mut(), if error_armed => {
                    error_armed = false;
                    self.machine.on_error_window_elapsed();
                    Directives::default()
                }
                result = join_flush(&mut self.flush) => {
                    self.flush = None;
                    if let Err(e) = &result {
                        warn!(document_id = %self.document_id, error = %e, "auto-save failed");
                    }
                    self.machine.on_flush_complete(result, self.core.clock.now_ms())
                }
            };

            if let Some(delay) = directives.arm_debounce {
                debounce.as_mut().reset(Instant::now() + delay);
                debounce_armed = true;
            }
            if let Some(delay) = directives.clear_error_after {
                error_clear.as_mut().reset(Instant::now() + delay);
                error_armed = true;
            }
            if let Some(draft) = directives.flush {
                let priority = if self.closing.is_some() || !self.waiters.is_empty() {
                    Priority::High
                } else {
                    Priority::Normal
                };
                self.start_flush(draft, priority);
            }

            let snapshot = self.machine.snapshot();
            self.state.send_if_modified(|current| {
                if *current == snapshot {
                    return false;
                }
                *current = snapshot.clone();
                true
            });

            if self.flush.is_none() {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(snapshot.clone());
                }
                if let Some(waiter) = self.closing.take() {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(snapshot);
                    }
                    debug!(document_id = %self.document_id, "auto-save closed");
                    return;
                }
            }
        }
    }

    fn start_flush(&mut self, draft: DocumentDraft, priority: Priority) {
        let core = self.core.clone();
        self.flush = Some(tokio::task::spawn_blocking(move || {
            core.save(draft, priority)
                .map(|stored| stored.version)
                .map_err(|e| e.to_string())
        }));
    }
}

async fn join_flush(flush: &mut Option<JoinHandle<FlushResult>>) -> FlushResult {
    match flush {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(format!("flush task failed: {e}")),
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Command;
    use quill_engine::{
        ConflictResolver, DocumentStore, MemoryBackend, RetryPolicy, SaveStatus, SyncQueue,
    };
    use std::time::Duration;

    fn core_with(backend: Arc<MemoryBackend>) -> (Arc<SyncCore>, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = SyncCore::new(
            DocumentStore::new(backend),
            SyncQueue::new(5),
            ConflictResolver::default(),
            RetryPolicy::default(),
            tx,
        );
        (Arc::new(core), rx)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn burst_is_written_once_after_quiet_period() {
        let (core, _rx) = core_with(Arc::new(MemoryBackend::new()));
        let task = AutoSaveTask::spawn(core.clone(), "d1".into(), AutoSaveConfig::default());
        let handle = task.handle.clone();

        for content in ["h", "he", "hel", "hell", "hello"] {
            handle.on_change("Title", content).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(core.store.get("d1").is_none());
        assert!(handle.save_state().has_unsaved_changes);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let snapshot = handle.save_now().await.unwrap();
        assert_eq!(snapshot.save_status, SaveStatus::Saved);
        assert!(!snapshot.has_unsaved_changes);

        let doc = core.store.get("d1").unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.content, "hello");
        assert_eq!(core.pending_items(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn save_now_flushes_pending_debounce() {
        let (core, _rx) = core_with(Arc::new(MemoryBackend::new()));
        let task = AutoSaveTask::spawn(core.clone(), "d1".into(), AutoSaveConfig::default());
        let handle = task.handle.clone();

        handle.on_change("Title", "draft").unwrap();
        let snapshot = handle.save_now().await.unwrap();

        assert!(!snapshot.has_unsaved_changes);
        assert_eq!(core.store.get("d1").unwrap().content, "draft");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn close_performs_final_flush() {
        let (core, _rx) = core_with(Arc::new(MemoryBackend::new()));
        let task = AutoSaveTask::spawn(core.clone(), "d1".into(), AutoSaveConfig::default());
        let handle = task.handle.clone();

        handle.on_change("Title", "last words").unwrap();
        let snapshot = task.close().await.unwrap();

        assert_eq!(snapshot.save_status, SaveStatus::Saved);
        assert_eq!(core.store.get("d1").unwrap().content, "last words");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn periodic_flush_bounds_staleness() {
        let (core, _rx) = core_with(Arc::new(MemoryBackend::new()));
        let config = AutoSaveConfig {
            debounce: Duration::from_secs(2),
            periodic: Duration::from_secs(5),
            error_window: Duration::from_secs(5),
        };
        let task = AutoSaveTask::spawn(core.clone(), "d1".into(), config);
        let handle = task.handle.clone();

        // Typing every second keeps resetting the debounce
        for i in 0..6 {
            handle.on_change("Title", format!("v{i}")).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let doc = core.store.get("d1").expect("periodic flush wrote the document");
        assert!(doc.content.starts_with('v'));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_write_shows_error_then_recovers() {
        let backend = Arc::new(MemoryBackend::with_capacity(10));
        let (core, _rx) = core_with(backend);
        let task = AutoSaveTask::spawn(core.clone(), "d1".into(), AutoSaveConfig::default());
        let handle = task.handle.clone();

        handle.on_change("Title", "too big for the disk").unwrap();
        let snapshot = handle.save_now().await.unwrap();
        assert_eq!(snapshot.save_status, SaveStatus::Error);
        assert!(snapshot.has_unsaved_changes);
        assert_eq!(core.pending_items(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let state = handle.save_state();
        assert_eq!(state.save_status, SaveStatus::Idle);
        assert!(state.has_unsaved_changes);
    }
}
