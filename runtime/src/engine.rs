//! The engine facade handed to the editing surface.

use crate::autosave::{AutoSaveHandle, AutoSaveTask};
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::orchestrator::{Command, NetworkState, Orchestrator};
use crate::remote::{HttpRemote, RemoteStore};
use crate::shared::SyncCore;
use crate::storage::FileBackend;
use dashmap::DashMap;
use parking_lot::Mutex;
use quill_engine::{
    ConflictResolver, Document, DocumentId, DocumentMerge, DocumentStore, QueueSnapshot,
    SaveSnapshot, StorageBackend, SyncQueue, SyncQueueItem, SyncStatus,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    resolver: ConflictResolver,
    backend: Option<Arc<dyn StorageBackend>>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl EngineBuilder {
    /// Store documents and the queue in `backend` instead of the data directory.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `remote` instead of an [`HttpRemote`] built from the config.
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Merge function for the `merge` conflict policy.
    pub fn merge(mut self, merger: impl DocumentMerge + 'static) -> Self {
        self.resolver = self.resolver.with_merge(merger);
        self
    }

    /// Load persisted state and start the orchestrator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let backend: Arc<dyn StorageBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(FileBackend::open(&config.data_dir, config.storage_capacity)?),
        };
        let remote: Arc<dyn RemoteStore> = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemote::from_config(&config)?),
        };

        let store = DocumentStore::open(backend.clone())?;
        let queue = match backend.load_queue()? {
            Some(bytes) => {
                let json = String::from_utf8_lossy(&bytes);
                SyncQueue::import_state(QueueSnapshot::from_json(&json)?)
            }
            None => SyncQueue::new(config.retry.max_retries),
        };
        info!(
            documents = store.len(),
            queued = queue.len(),
            policy = %config.conflict_policy,
            "engine starting"
        );

        let (commands, rx) = mpsc::unbounded_channel();
        let core = Arc::new(SyncCore::new(
            store,
            queue,
            self.resolver,
            config.retry.clone(),
            commands,
        ));
        core.recover_orphans()?;

        let orchestrator = Orchestrator::new(
            core.clone(),
            remote,
            rx,
            config.batch_size,
            config.sync_interval,
        );
        let task = tokio::spawn(orchestrator.run());

        Ok(Engine {
            config,
            core,
            documents: DashMap::new(),
            orchestrator: Mutex::new(Some(task)),
        })
    }
}

/// Local-first document engine: auto-save, durable queue and background sync.
///
/// Edits never wait for the network. [`Engine::on_content_change`] feeds the
/// document's auto-save controller; saved documents are queued and delivered
/// whenever the host reports connectivity through [`Engine::set_online`].
pub struct Engine {
    config: EngineConfig,
    core: Arc<SyncCore>,
    documents: DashMap<DocumentId, AutoSaveTask>,
    orchestrator: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("open_documents", &self.documents.len())
            .field("status", &self.core.status())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            resolver: ConflictResolver::new(config.conflict_policy),
            config,
            backend: None,
            remote: None,
        }
    }

    /// Start with the data directory and HTTP remote named in `config`.
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::builder(config).start()
    }

    /// Start from `QUILL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::start(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a document for editing, starting its auto-save controller.
    pub fn open_document(&self, id: &str) -> Result<()> {
        self.ensure_running()?;
        self.documents
            .entry(id.to_string())
            .or_insert_with(|| {
                AutoSaveTask::spawn(self.core.clone(), id.to_string(), self.config.autosave)
            });
        Ok(())
    }

    /// A content or title change from the editor.
    pub fn on_content_change(
        &self,
        id: &str,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<()> {
        self.open_document(id)?;
        match self.documents.get(id) {
            Some(task) => task.handle.on_change(title, content),
            None => Err(SyncError::Disposed),
        }
    }

    /// Flush one document now, bypassing the debounce.
    pub async fn save_now(&self, id: &str) -> Result<SaveSnapshot> {
        self.handle(id)?.save_now().await
    }

    /// The process is being suspended: flush every open document.
    pub async fn on_suspend(&self) -> Vec<(DocumentId, Result<SaveSnapshot>)> {
        let handles: Vec<_> = self
            .documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.clone()))
            .collect();

        let flushes = handles
            .into_iter()
            .map(|(id, handle)| async move { (id, handle.save_now().await) });
        futures::future::join_all(flushes).await
    }

    /// The editing surface was hidden, such as a backgrounded window or tab.
    ///
    /// Same flush as [`on_suspend`](Self::on_suspend).
    pub async fn on_visibility_hidden(&self) -> Vec<(DocumentId, Result<SaveSnapshot>)> {
        self.on_suspend().await
    }

    /// Save indicator of an open document.
    pub fn save_state(&self, id: &str) -> Option<SaveSnapshot> {
        self.documents.get(id).map(|task| task.handle.save_state())
    }

    pub fn subscribe_save_state(&self, id: &str) -> Option<watch::Receiver<SaveSnapshot>> {
        self.documents.get(id).map(|task| task.handle.subscribe())
    }

    /// Final flush of one document, then stop its timers.
    pub async fn close_document(&self, id: &str) -> Result<Option<SaveSnapshot>> {
        match self.documents.remove(id) {
            Some((_, task)) => task.close().await.map(Some),
            None => Ok(None),
        }
    }

    /// Delete a document locally and queue the remote delete.
    ///
    /// Returns `false` when the document does not exist.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        self.close_document(id).await?;
        let core = self.core.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || core.delete(&id)).await?
    }

    /// Latest local snapshot of a document.
    pub fn document(&self, id: &str) -> Option<Document> {
        self.core.store.get(id)
    }

    /// Connectivity report from the platform.
    pub fn set_online(&self, online: bool) -> Result<()> {
        self.command(Command::Online(online))
    }

    /// Drain now if online; coalesced with a running drain.
    pub fn sync_now(&self) -> Result<()> {
        self.command(Command::Drain)
    }

    pub fn status(&self) -> SyncStatus {
        self.core.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.core.subscribe()
    }

    /// Where the orchestrator is: offline, idle or draining.
    pub fn network_state(&self) -> NetworkState {
        self.core.network_state()
    }

    /// Drain cycles run since start.
    pub fn drain_cycles(&self) -> u64 {
        self.core.drain_cycles()
    }

    /// Every queued operation in enqueue order.
    pub fn queued(&self) -> Vec<SyncQueueItem> {
        self.core.queued_items()
    }

    pub fn dead_letters(&self) -> Vec<SyncQueueItem> {
        self.core.dead_letters()
    }

    /// Manually retry a dead-lettered item with a fresh retry budget.
    pub async fn retry_dead_letter(&self, item_id: &str) -> Result<()> {
        self.ensure_running()?;
        let core = self.core.clone();
        let item_id = item_id.to_string();
        tokio::task::spawn_blocking(move || core.requeue(&item_id)).await?
    }

    /// Give up on a document's queued operations. Local content is kept.
    pub async fn discard_queued(&self, id: &str) -> Result<Vec<SyncQueueItem>> {
        let core = self.core.clone();
        let id = id.to_string();
        Ok(tokio::task::spawn_blocking(move || core.discard(&id)).await?)
    }

    /// Flush every open document, then stop the orchestrator.
    ///
    /// An in-flight remote call is allowed to finish; its result is discarded
    /// and the item stays queued for the next start.
    pub async fn dispose(&self) {
        let ids: Vec<DocumentId> = self.documents.iter().map(|e| e.key().clone()).collect();
        let closes = ids.into_iter().filter_map(|id| self.documents.remove(&id)).map(
            |(id, task)| async move {
                if let Err(e) = task.close().await {
                    warn!(document_id = %id, error = %e, "final flush failed");
                }
            },
        );
        futures::future::join_all(closes).await;

        self.core.mark_disposed();
        self.core.send(Command::Dispose);
        let task = self.orchestrator.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("engine disposed");
    }

    fn command(&self, command: Command) -> Result<()> {
        self.ensure_running()?;
        if self.core.send(command) {
            Ok(())
        } else {
            Err(SyncError::Disposed)
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.core.is_disposed() {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Handle to an open document's auto-save controller.
    pub fn handle(&self, id: &str) -> Result<AutoSaveHandle> {
        self.documents
            .get(id)
            .map(|task| task.handle.clone())
            .ok_or_else(|| SyncError::Store(quill_engine::StoreError::NotFound(id.to_string())))
    }
}
