//! Per-key mutual exclusion.
//!
//! Writers that read-modify-write a single logical record (one module, or one
//! member's day) take the lock for that key; different keys never contend.
//! Writers that share files with other processes take a [`FileLock`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// A table of mutexes keyed by `K`, created on demand and dropped once idle.
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock();
            f()
        };

        // Drop our handle under the table lock so the count only reflects
        // the table and any waiter that already cloned the slot.
        let mut slots = self.slots.lock();
        drop(slot);
        if slots.get(&key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(&key);
        }

        result
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive advisory lock on a lock file, held until dropped.
///
/// Every open of the lock file is a separate lock holder, so this excludes
/// other processes as well as other handles in this process.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the lock at `path` is acquired, creating the file if
    /// needed.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("could not release file lock: {e}");
        }
    }
}
