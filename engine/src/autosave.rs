//! Auto-save state machine for one open document.
//!
//! [`AutoSave`] decides *when* to write; it owns no timers. Every input returns
//! [`Directives`] telling the host which timer to (re)arm and which draft, if
//! any, to write to the store right now. The host reports the write's result
//! back through [`AutoSave::on_flush_complete`].
//!
//! ```text
//!            change                 debounce / tick / force
//!   Idle ───────────▶ PendingDebounce ────────────────────▶ Flushing
//!    ▲                   ▲    │ change (re-arm)                 │
//!    │                   └────┘                                 │
//!    └──────────── complete, nothing pending ◀──────────────────┘
//!                  complete, change arrived ──▶ PendingDebounce
//! ```

use crate::{DocumentDraft, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timer settings for auto-save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveConfig {
    /// Quiet period after the last change before writing
    pub debounce: Duration,
    /// Upper bound on how long unsaved changes may sit under continuous typing
    pub periodic: Duration,
    /// How long a failed write shows as `error`
    pub error_window: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            periodic: Duration::from_secs(30),
            error_window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoSaveState {
    Idle,
    PendingDebounce,
    Flushing,
}

/// Save indicator shown by the editing surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshot {
    pub save_status: SaveStatus,
    pub last_saved: Option<Timestamp>,
    pub has_unsaved_changes: bool,
}

/// What the host must do after feeding an input to [`AutoSave`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// (Re)start the debounce timer with this delay
    pub arm_debounce: Option<Duration>,
    /// Write this draft to the store now
    pub flush: Option<DocumentDraft>,
    /// Start the error display timer with this delay
    pub clear_error_after: Option<Duration>,
}

impl Directives {
    fn flush(draft: Option<DocumentDraft>) -> Self {
        Self {
            flush: draft,
            ..Self::default()
        }
    }
}

/// Single-flight auto-save machine.
#[derive(Debug, Clone)]
pub struct AutoSave {
    config: AutoSaveConfig,
    state: AutoSaveState,
    /// Newest unsaved edit
    pending: Option<DocumentDraft>,
    /// Edit currently being written
    in_flight: Option<DocumentDraft>,
    /// A forced flush arrived while flushing
    force_requested: bool,
    save_status: SaveStatus,
    last_saved: Option<Timestamp>,
}

impl AutoSave {
    pub fn new(config: AutoSaveConfig) -> Self {
        Self {
            config,
            state: AutoSaveState::Idle,
            pending: None,
            in_flight: None,
            force_requested: false,
            save_status: SaveStatus::Idle,
            last_saved: None,
        }
    }

    pub fn config(&self) -> &AutoSaveConfig {
        &self.config
    }

    pub fn state(&self) -> AutoSaveState {
        self.state
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.pending.is_some() || self.in_flight.is_some()
    }

    pub fn snapshot(&self) -> SaveSnapshot {
        SaveSnapshot {
            save_status: self.save_status,
            last_saved: self.last_saved,
            has_unsaved_changes: self.has_unsaved_changes(),
        }
    }

    /// A content or title change from the editor.
    ///
    /// While a write is in flight the change is only captured; a new debounce
    /// cycle starts once the write completes.
    pub fn on_change(&mut self, draft: DocumentDraft) -> Directives {
        self.pending = Some(draft);

        match self.state {
            AutoSaveState::Flushing => Directives::default(),
            AutoSaveState::Idle | AutoSaveState::PendingDebounce => {
                self.state = AutoSaveState::PendingDebounce;
                Directives {
                    arm_debounce: Some(self.config.debounce),
                    ..Directives::default()
                }
            }
        }
    }

    /// The debounce timer fired.
    pub fn on_debounce_elapsed(&mut self) -> Directives {
        if self.state != AutoSaveState::PendingDebounce {
            return Directives::default();
        }
        Directives::flush(self.begin_flush())
    }

    /// The periodic timer fired.
    pub fn on_periodic_tick(&mut self) -> Directives {
        if self.state == AutoSaveState::Flushing || self.pending.is_none() {
            return Directives::default();
        }
        Directives::flush(self.begin_flush())
    }

    /// Flush now, bypassing the debounce (suspend, save-now, dispose).
    ///
    /// If a write is already in flight the force is remembered and served as
    /// soon as it completes.
    pub fn force(&mut self) -> Directives {
        if self.state == AutoSaveState::Flushing {
            if self.pending.is_some() {
                self.force_requested = true;
            }
            return Directives::default();
        }
        Directives::flush(self.begin_flush())
    }

    /// Report the result of the write handed out by the last directive.
    pub fn on_flush_complete(
        &mut self,
        result: std::result::Result<Version, String>,
        now: Timestamp,
    ) -> Directives {
        if self.state != AutoSaveState::Flushing {
            return Directives::default();
        }

        let failed = self.in_flight.take();
        let changed_meanwhile = self.pending.is_some();
        let forced = std::mem::take(&mut self.force_requested);
        let mut directives = Directives::default();

        match result {
            Ok(_) => {
                self.last_saved = Some(now);
                self.save_status = SaveStatus::Saved;
            }
            Err(_) => {
                // Keep the failed edit unless something newer replaced it
                if !changed_meanwhile {
                    self.pending = failed;
                }
                self.save_status = SaveStatus::Error;
                directives.clear_error_after = Some(self.config.error_window);
            }
        }

        self.state = AutoSaveState::Idle;
        if forced {
            directives.flush = self.begin_flush();
        } else if changed_meanwhile {
            self.state = AutoSaveState::PendingDebounce;
            directives.arm_debounce = Some(self.config.debounce);
        }
        directives
    }

    /// The error display window elapsed.
    pub fn on_error_window_elapsed(&mut self) {
        if self.save_status == SaveStatus::Error {
            self.save_status = SaveStatus::Idle;
        }
    }

    fn begin_flush(&mut self) -> Option<DocumentDraft> {
        let draft = self.pending.take()?;
        self.in_flight = Some(draft.clone());
        self.state = AutoSaveState::Flushing;
        self.save_status = SaveStatus::Saving;
        Some(draft)
    }
}

impl Default for AutoSave {
    fn default() -> Self {
        Self::new(AutoSaveConfig::default())
    }
}
