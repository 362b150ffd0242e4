//! Running counters of what the attendance server has done.
//!
//! The counters are cheap atomics shared between the accumulator and the
//! rotation scheduler, and can be persisted so `status` reports cumulative
//! totals across runs. Several processes may share one counters file: a save
//! adds what this process counted since its previous save to the totals on
//! disk, under a file lock.

use crate::sync::FileLock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Activity counters for the current process.
#[derive(Debug)]
pub struct ActivityLog {
    /// Sightings merged into a record
    sightings_recorded: AtomicU64,
    /// Sightings that opened a new session span
    sessions_opened: AtomicU64,
    /// Reports carrying an identifier no module publishes
    reports_rejected: AtomicU64,
    /// Successful rotations (scheduled or seed edits)
    rotations_applied: AtomicU64,
    /// Rotations rejected because the new state could not be persisted
    rotations_failed: AtomicU64,
    /// Record writes retried after a version conflict
    conflicts_retried: AtomicU64,
    /// When this log was created
    started_at: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
    /// Disk totals and local counts as of the last load or save
    synced: Mutex<SyncPoint>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SyncPoint {
    disk: Counters,
    local: Counters,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            sightings_recorded: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            reports_rejected: AtomicU64::new(0),
            rotations_applied: AtomicU64::new(0),
            rotations_failed: AtomicU64::new(0),
            conflicts_retried: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
            synced: Mutex::new(SyncPoint::default()),
        }
    }

    /// Create an activity log that loads and saves its counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let log = Self {
            persist_path: Some(path),
            ..Self::new()
        };

        match log.read_disk() {
            Ok(disk) => log.synced.lock().disk = disk,
            Err(e) => tracing::warn!("could not load previous activity counters: {e}"),
        }

        log
    }

    pub fn record_sighting(&self, opened_session: bool) {
        self.sightings_recorded.fetch_add(1, Ordering::Relaxed);
        if opened_session {
            self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_report_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotations_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation_failed(&self) {
        self.rotations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_retried(&self) {
        self.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters recorded by this process.
    fn local(&self) -> Counters {
        Counters {
            sightings_recorded: self.sightings_recorded.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            rotations_applied: self.rotations_applied.load(Ordering::Relaxed),
            rotations_failed: self.rotations_failed.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
        }
    }

    /// Get the current counters: persisted totals plus anything not yet
    /// saved.
    pub fn stats(&self) -> ActivityStats {
        let synced = *self.synced.lock();
        let totals = synced.disk.plus(self.local().minus(synced.local));
        ActivityStats {
            sightings_recorded: totals.sightings_recorded,
            sessions_opened: totals.sessions_opened,
            reports_rejected: totals.reports_rejected,
            rotations_applied: totals.rotations_applied,
            rotations_failed: totals.rotations_failed,
            conflicts_retried: totals.conflicts_retried,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Sightings recorded: {}\n\
             - Sessions opened: {}\n\
             - Reports rejected: {}\n\
             - Rotations applied: {}\n\
             - Rotations failed: {}\n\
             - Conflicts retried: {}\n\
             - Uptime: {} seconds",
            stats.sightings_recorded,
            stats.sessions_opened,
            stats.reports_rejected,
            stats.rotations_applied,
            stats.rotations_failed,
            stats.conflicts_retried,
            stats.uptime_secs
        )
    }

    /// Add the counts since the previous save to the totals on disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _lock = FileLock::acquire(&path.with_extension("json.lock"))?;
        let mut synced = self.synced.lock();
        let local = self.local();
        let disk = self.read_disk()?.plus(local.minus(synced.local));

        let persisted = PersistedCounters {
            counters: disk,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        *synced = SyncPoint { disk, local };
        Ok(())
    }

    fn read_disk(&self) -> Result<Counters, std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(Counters::default());
        };
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let persisted: PersistedCounters =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                Ok(persisted.counters)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Counters::default()),
            Err(e) => Err(e),
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub sightings_recorded: u64,
    pub sessions_opened: u64,
    pub reports_rejected: u64,
    pub rotations_applied: u64,
    pub rotations_failed: u64,
    pub conflicts_retried: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Counters {
    sightings_recorded: u64,
    sessions_opened: u64,
    reports_rejected: u64,
    rotations_applied: u64,
    rotations_failed: u64,
    conflicts_retried: u64,
}

impl Counters {
    fn zip(self, other: Self, op: fn(u64, u64) -> u64) -> Self {
        Self {
            sightings_recorded: op(self.sightings_recorded, other.sightings_recorded),
            sessions_opened: op(self.sessions_opened, other.sessions_opened),
            reports_rejected: op(self.reports_rejected, other.reports_rejected),
            rotations_applied: op(self.rotations_applied, other.rotations_applied),
            rotations_failed: op(self.rotations_failed, other.rotations_failed),
            conflicts_retried: op(self.conflicts_retried, other.conflicts_retried),
        }
    }

    fn plus(self, other: Self) -> Self {
        self.zip(other, u64::saturating_add)
    }

    fn minus(self, other: Self) -> Self {
        self.zip(other, u64::saturating_sub)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCounters {
    #[serde(flatten)]
    counters: Counters,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

pub fn create_shared_log() -> SharedActivityLog {
    Arc::new(ActivityLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedActivityLog {
    Arc::new(ActivityLog::with_persistence(path))
}
