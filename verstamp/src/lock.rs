//! Process-wide exclusive locks keyed by file path.
//!
//! Two stamps of the same binary from different threads must not interleave
//! their read-modify-write cycles. Stamps of different files run in parallel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};

use tracing::debug;

#[derive(Default)]
struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

fn registry() -> &'static PathLocks {
    static LOCKS: OnceLock<PathLocks> = OnceLock::new();
    LOCKS.get_or_init(PathLocks::default)
}

/// Guard holding the exclusive lock for one path until dropped.
#[derive(Debug)]
pub struct PathLockGuard {
    key: PathBuf,
}

/// Block until no other thread in this process holds `path`, then take it.
///
/// The key is the canonical path when it can be resolved so that different
/// spellings of one file share a lock.
pub fn lock_path(path: &Path) -> PathLockGuard {
    let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let locks = registry();
    let mut held = locks.held.lock().unwrap_or_else(PoisonError::into_inner);
    while held.contains(&key) {
        debug!(path = %key.display(), "waiting for stamp lock");
        held = locks
            .released
            .wait(held)
            .unwrap_or_else(PoisonError::into_inner);
    }
    held.insert(key.clone());
    PathLockGuard { key }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        let locks = registry();
        let mut held = locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        locks.released.notify_all();
    }
}
