//! Store locking: an in-process mutex per digest plus a per-store advisory
//! file lock, so concurrent `ensure` calls for the same implementation
//! (within one process, and across processes) serialize instead of racing
//! to extract the same archive twice (§4.8).

use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zi_core::errors::Error;

/// In-process table of per-digest mutexes. Acquiring the same digest twice
/// from different threads blocks the second caller instead of letting both
/// race to populate the same store entry.
#[derive(Default)]
pub struct DigestLockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DigestLockTable {
    pub fn new() -> Self {
        DigestLockTable::default()
    }

    pub fn lock_for(&self, digest: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(digest.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }
}

/// A held advisory lock on the single `store.lock` file under the store's
/// `locks/` directory. The OS releases the lock when `_file` is dropped.
///
/// Every operation locks the same file: `add`/`remove` take it shared, so
/// any number of them can run concurrently against each other, while
/// `optimise` takes it exclusively so it never runs alongside an `add`,
/// `remove`, or another `optimise`.
pub struct StoreFileLock {
    _file: File,
}

impl StoreFileLock {
    fn lock_path(locks_dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(locks_dir)?;
        Ok(locks_dir.join("store.lock"))
    }

    pub fn acquire_shared(locks_dir: &Path) -> Result<Self, Error> {
        let path = Self::lock_path(locks_dir)?;
        let file = File::create(&path)?;
        file.lock_shared().map_err(|e| Error::Io {
            message: format!("failed to acquire shared store lock at '{}': {e}", path.display()),
        })?;
        Ok(StoreFileLock { _file: file })
    }

    pub fn acquire_exclusive(locks_dir: &Path) -> Result<Self, Error> {
        let path = Self::lock_path(locks_dir)?;
        let file = File::create(&path)?;
        file.lock_exclusive().map_err(|e| Error::Io {
            message: format!("failed to acquire exclusive store lock at '{}': {e}", path.display()),
        })?;
        Ok(StoreFileLock { _file: file })
    }
}
