//! Sync orchestrator: network state, queue draining and the drain timers.
//!
//! One task per engine. It moves between `Offline`, `OnlineIdle` and
//! `Draining`; drains never overlap, and a drain requested while one is
//! running is served right after it.

use crate::remote::RemoteStore;
use crate::shared::{Settled, SyncCore};
use quill_engine::SyncQueueItem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Messages to the orchestrator task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Connectivity changed
    Online(bool),
    /// Drain as soon as possible
    Drain,
    /// Stop after the current remote call
    Dispose,
}

/// Orchestrator state, as reported by [`Engine::network_state`](crate::Engine::network_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    OnlineIdle,
    Draining,
}

pub(crate) struct Orchestrator {
    core: Arc<SyncCore>,
    remote: Arc<dyn RemoteStore>,
    commands: mpsc::UnboundedReceiver<Command>,
    batch_size: usize,
    sync_interval: Duration,
    state: NetworkState,
    drain_requested: bool,
    disposing: bool,
}

impl Orchestrator {
    pub(crate) fn new(
        core: Arc<SyncCore>,
        remote: Arc<dyn RemoteStore>,
        commands: mpsc::UnboundedReceiver<Command>,
        batch_size: usize,
        sync_interval: Duration,
    ) -> Self {
        Self {
            core,
            remote,
            commands,
            batch_size,
            sync_interval,
            state: NetworkState::Offline,
            drain_requested: false,
            disposing: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut periodic =
            tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.disposing {
            let redrive = self.redrive_at();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => self.disposing = true,
                },
                _ = periodic.tick() => {
                    if self.state == NetworkState::OnlineIdle && self.core.pending_items() > 0 {
                        debug!("periodic drain");
                        self.drain_requested = true;
                    }
                }
                _ = tokio::time::sleep_until(redrive.unwrap_or_else(far_future)), if redrive.is_some() => {
                    debug!("backoff elapsed, redriving");
                    self.drain_requested = true;
                }
            }

            while self.drain_requested
                && self.state == NetworkState::OnlineIdle
                && !self.disposing
            {
                self.drain().await;
            }
        }

        let released = self.core.release_all();
        self.set_state(NetworkState::Offline);
        self.core.update_status(|s| s.is_syncing = false);
        info!(released, "sync orchestrator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Online(true) => {
                if self.state == NetworkState::Offline {
                    info!("network up");
                    self.set_state(NetworkState::OnlineIdle);
                }
                self.core.update_status(|s| s.is_online = Some(true));
                self.drain_requested = true;
            }
            Command::Online(false) => {
                if self.state != NetworkState::Offline {
                    info!("network down");
                }
                self.set_state(NetworkState::Offline);
                self.core.update_status(|s| s.is_online = Some(false));
            }
            Command::Drain => self.drain_requested = true,
            Command::Dispose => self.disposing = true,
        }
    }

    fn set_state(&mut self, state: NetworkState) {
        self.state = state;
        self.core.set_network_state(state);
    }

    /// When the next backed-off item becomes drainable, if we are waiting.
    fn redrive_at(&self) -> Option<Instant> {
        if self.state != NetworkState::OnlineIdle {
            return None;
        }
        self.core
            .next_ready_at()
            .map(|at| self.core.clock.instant_at(at))
    }

    /// One drain cycle: send batches until nothing is drainable.
    async fn drain(&mut self) {
        self.drain_requested = false;
        self.set_state(NetworkState::Draining);
        let cycle = self.core.begin_drain();
        self.core.update_status(|s| s.is_syncing = true);

        let mut sent = 0usize;
        let mut failed = 0usize;

        'cycle: loop {
            let batch = self.core.next_batch(self.batch_size);
            if batch.is_empty() {
                break;
            }

            let mut items = batch.into_iter();
            while let Some(item) = items.next() {
                self.absorb_commands();
                if self.state == NetworkState::Offline || self.disposing {
                    self.release(std::iter::once(item).chain(items));
                    break 'cycle;
                }

                let operation = self.core.operation_for(&item);
                let outcome = self.remote.apply(operation).await;

                if self.core.is_disposed() {
                    self.disposing = true;
                    self.release(std::iter::once(item).chain(items));
                    break 'cycle;
                }

                // Settling writes the store and the queue file.
                let core = self.core.clone();
                let settling = item.clone();
                match tokio::task::spawn_blocking(move || core.settle(&settling, outcome)).await {
                    Ok(Settled::Applied | Settled::Resolved(_) | Settled::Superseded) => sent += 1,
                    Ok(Settled::Retrying(_) | Settled::DeadLettered) => failed += 1,
                    Err(e) => {
                        warn!(item_id = %item.id, error = %e, "settle task failed");
                        self.core.release(&item);
                        failed += 1;
                    }
                }
            }
        }

        let online = self.state != NetworkState::Offline;
        if online {
            self.set_state(NetworkState::OnlineIdle);
        }
        let now = self.core.clock.now_ms();
        self.core.update_status(|s| {
            s.is_syncing = false;
            if online {
                s.last_sync = Some(now);
            }
        });

        info!(cycle, sent, failed, pending = self.core.pending_items(), "drain cycle finished");
    }

    /// Apply commands that arrived while a remote call was in progress.
    fn absorb_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Online(true) => {
                    self.core.update_status(|s| s.is_online = Some(true));
                }
                other => self.handle(other),
            }
        }
    }

    fn release(&self, items: impl Iterator<Item = SyncQueueItem>) {
        for item in items {
            self.core.release(&item);
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
