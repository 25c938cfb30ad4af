//! File-backed storage: one JSON record per document plus the queue file.
//!
//! Layout under the data directory:
//!
//! ```text
//! documents/<sha256(id)>.json
//! queue.json
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place, so a
//! crash mid-write leaves the previous record intact.

use parking_lot::Mutex;
use quill_engine::{error::StoreResult, StorageBackend, StoreError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const DOCUMENTS_DIR: &str = "documents";
const QUEUE_FILE: &str = "queue.json";

/// Disk-backed [`StorageBackend`].
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    capacity: Option<u64>,
    /// Size of each document record on disk, for capacity accounting
    sizes: Mutex<HashMap<String, u64>>,
}

impl FileBackend {
    /// Open (creating if needed) a data directory.
    pub fn open(root: impl AsRef<Path>, capacity: Option<u64>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(DOCUMENTS_DIR)).map_err(io_error)?;

        let mut sizes = HashMap::new();
        for entry in fs::read_dir(root.join(DOCUMENTS_DIR)).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let len = entry.metadata().map_err(io_error)?.len();
                sizes.insert(stem.to_string(), len);
            }
        }

        tracing::debug!(root = %root.display(), documents = sizes.len(), "opened data directory");

        Ok(Self {
            root,
            capacity,
            sizes: Mutex::new(sizes),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes used by document records.
    pub fn used(&self) -> u64 {
        self.sizes.lock().values().sum()
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.root.join(DOCUMENTS_DIR).join(format!("{key}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn write_document(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let key = file_key(id);
        let mut sizes = self.sizes.lock();

        if let Some(capacity) = self.capacity {
            let replaced = sizes.get(&key).copied().unwrap_or(0);
            let used = sizes.values().sum::<u64>() - replaced;
            let available = capacity.saturating_sub(used);
            if bytes.len() as u64 > available {
                return Err(StoreError::CapacityExceeded {
                    needed: bytes.len(),
                    available: available as usize,
                });
            }
        }

        write_atomic(&self.document_path(&key), bytes).map_err(|e| full_or(e, bytes.len()))?;
        sizes.insert(key, bytes.len() as u64);
        Ok(())
    }

    fn load_documents(&self) -> StoreResult<Vec<Vec<u8>>> {
        let keys: Vec<String> = self.sizes.lock().keys().cloned().collect();
        keys.iter()
            .map(|key| fs::read(self.document_path(key)).map_err(io_error))
            .collect()
    }

    fn write_queue(&self, bytes: &[u8]) -> StoreResult<()> {
        write_atomic(&self.root.join(QUEUE_FILE), bytes).map_err(|e| full_or(e, bytes.len()))
    }

    fn load_queue(&self) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.root.join(QUEUE_FILE)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// File name stem for a document id: a hex SHA-256 digest, so every id maps
/// to a 64-character name regardless of its length or characters.
fn file_key(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

fn io_error(err: io::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn full_or(err: io::Error, needed: usize) -> StoreError {
    if err.kind() == io::ErrorKind::StorageFull {
        StoreError::CapacityExceeded {
            needed,
            available: 0,
        }
    } else {
        io_error(err)
    }
}
