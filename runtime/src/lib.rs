//! # Quill Sync
//!
//! The async runtime around [`quill_engine`]: timers, the disk and the network.
//!
//! An [`Engine`] owns one auto-save task per open document and one sync
//! orchestrator task. Editors feed changes through [`Engine::on_content_change`]
//! and never wait on the network; saved documents are written to disk and
//! queued, and the orchestrator drains the queue whenever the host reports
//! connectivity.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quill_sync::{Engine, EngineConfig};
//!
//! # async fn run() -> quill_sync::Result<()> {
//! quill_sync::telemetry::init();
//!
//! let config = EngineConfig::default().with_remote("http://localhost:3000", None);
//! let engine = Engine::start(config)?;
//!
//! engine.open_document("doc-1")?;
//! engine.on_content_change("doc-1", "Essay", "First draft")?;
//! engine.set_online(true)?;
//!
//! engine.on_suspend().await;
//! engine.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod autosave;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod remote;
mod shared;
pub mod storage;
pub mod telemetry;

pub use autosave::AutoSaveHandle;
pub use clock::Clock;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{Result, SyncError};
pub use orchestrator::NetworkState;
pub use remote::{HttpRemote, RemoteStore};
pub use storage::FileBackend;

pub use quill_engine;
