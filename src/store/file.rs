//! JSON-file record store.
//!
//! The store is a directory:
//!
//! ```text
//! <root>/.lock                  exclusive lock held by every writer
//! <root>/modules.json           all modules
//! <root>/latest.json            latest record date per member
//! <root>/records/YYYY-MM-DD.json  records of one local date
//! ```
//!
//! Nothing is cached; every read goes to disk, so several handles and
//! several processes see each other's writes. A write takes the directory
//! lock, re-reads the file it changes, checks versions against what is on
//! disk, and replaces the file through a temporary file and a rename. A
//! failed write leaves the previous file in place. A record write only
//! rewrites its own day.

use super::state::{next_module, next_record};
use super::RecordStore;
use crate::core::{AttendanceRecord, MemberId};
use crate::error::StoreError;
use crate::rotation::Module;
use crate::sync::FileLock;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";
const MODULES_FILE: &str = "modules.json";
const LATEST_FILE: &str = "latest.json";
const RECORDS_DIR: &str = "records";

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(RECORDS_DIR))?;
        tracing::debug!(root = %root.display(), "record store opened");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        Ok(FileLock::acquire(&self.root.join(LOCK_FILE))?)
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(RECORDS_DIR)
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn read_modules(&self) -> Result<Vec<Module>, StoreError> {
        read_json(&self.root.join(MODULES_FILE))
    }

    fn read_latest(&self) -> Result<BTreeMap<MemberId, NaiveDate>, StoreError> {
        read_json(&self.root.join(LATEST_FILE))
    }

    fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        read_json(&self.day_path(date))
    }

    /// Dates with a record file, in order.
    fn stored_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(self.root.join(RECORDS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                Ok(date) => dates.push(date),
                Err(_) => tracing::debug!(path = %path.display(), "skipping unknown file"),
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    /// Record the date as the member's latest unless a later one is known.
    /// Called with the store lock held.
    fn advance_latest(&self, member: &MemberId, date: NaiveDate) -> Result<(), StoreError> {
        let mut latest = self.read_latest()?;
        if latest.get(member).is_some_and(|known| *known >= date) {
            return Ok(());
        }
        latest.insert(member.clone(), date);
        write_json(&self.root.join(LATEST_FILE), &latest)
    }
}

/// Parse `path`, or the default value when it does not exist yet.
fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl RecordStore for JsonFileStore {
    fn get_module(&self, name: &str) -> Result<Option<Module>, StoreError> {
        Ok(self
            .read_modules()?
            .into_iter()
            .find(|m| m.name() == name))
    }

    fn put_module(&self, module: &Module) -> Result<Module, StoreError> {
        let _lock = self.lock()?;
        let mut modules = self.read_modules()?;
        let position = modules.iter().position(|m| m.name() == module.name());
        let stored = next_module(module, position.map(|i| &modules[i]))?;

        match position {
            Some(i) => modules[i] = stored.clone(),
            None => {
                modules.push(stored.clone());
                modules.sort_by(|a, b| a.name().cmp(b.name()));
            }
        }
        write_json(&self.root.join(MODULES_FILE), &modules)?;
        Ok(stored)
    }

    fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        self.read_modules()
    }

    fn get_record(
        &self,
        member: &MemberId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .read_day(date)?
            .into_iter()
            .find(|r| &r.member == member))
    }

    fn put_record(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, StoreError> {
        let _lock = self.lock()?;
        let mut day = self.read_day(record.date)?;
        let position = day.iter().position(|r| r.member == record.member);
        let stored = next_record(record, position.map(|i| &day[i]))?;

        match position {
            Some(i) => day[i] = stored.clone(),
            None => {
                day.push(stored.clone());
                day.sort_by(|a, b| a.member.cmp(&b.member));
            }
        }
        write_json(&self.day_path(record.date), &day)?;
        self.advance_latest(&stored.member, stored.date)?;
        Ok(stored)
    }

    fn records_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        if end < start {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for date in self
            .stored_dates()?
            .into_iter()
            .filter(|d| (start..=end).contains(d))
        {
            records.extend(self.read_day(date)?);
        }
        Ok(records)
    }

    fn latest_record(&self, member: &MemberId) -> Result<Option<AttendanceRecord>, StoreError> {
        match self.read_latest()?.get(member) {
            Some(date) => self.get_record(member, *date),
            None => Ok(None),
        }
    }

    fn latest_records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut by_date: BTreeMap<NaiveDate, Vec<MemberId>> = BTreeMap::new();
        for (member, date) in self.read_latest()? {
            by_date.entry(date).or_default().push(member);
        }

        let mut records = Vec::new();
        for (date, members) in by_date {
            records.extend(
                self.read_day(date)?
                    .into_iter()
                    .filter(|r| members.contains(&r.member)),
            );
        }
        records.sort_by(|a, b| a.member.cmp(&b.member));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::Seed;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn record(member: &str, d: u32) -> AttendanceRecord {
        let at = Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap();
        AttendanceRecord::first_sighting(member.into(), day(d), "lab", at)
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut record = AttendanceRecord::first_sighting("m".into(), day(1), "lab", at);
        record.apply_sighting("lab", at + Duration::minutes(2), Duration::minutes(5));
        record.apply_sighting("lab", at + Duration::hours(3), Duration::minutes(5));

        let module = Module::new("lab", "X", Seed::new(11).unwrap(), 10).unwrap();
        let stored = {
            let store = JsonFileStore::open(&root).unwrap();
            store.put_record(&record).unwrap();
            store.put_module(&module).unwrap()
        };

        let store = JsonFileStore::open(&root).unwrap();
        assert_eq!(store.get_module("lab").unwrap(), Some(stored));

        let loaded = store.get_record(&"m".into(), day(1)).unwrap().unwrap();
        assert_eq!(loaded.sessions(), record.sessions());
        assert_eq!(loaded.duration(), record.duration());
        assert_eq!(loaded.last_seen(), record.last_seen());
        assert_eq!(loaded.modules(), record.modules());
        assert_eq!(loaded.version(), 1);
        assert_eq!(
            store.latest_record(&"m".into()).unwrap().map(|r| r.date),
            Some(day(1))
        );
    }

    #[test]
    fn test_handles_share_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = JsonFileStore::open(dir.path()).unwrap();
        let b = JsonFileStore::open(dir.path()).unwrap();

        // Modules: b sees a's write, and a's stale copy cannot undo b's pause.
        let module = Module::new("lab", "X", Seed::new(3).unwrap(), 10).unwrap();
        let registered = a.put_module(&module).unwrap();
        let seen = b.get_module("lab").unwrap().unwrap();
        b.put_module(&seen.with_paused(true)).unwrap();

        let err = a
            .put_module(&registered.rotated(Seed::new(4).unwrap(), Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::ModuleConflict { expected: 1, found: 2, .. }));
        assert!(a.get_module("lab").unwrap().unwrap().is_paused());

        // Records: writes from both handles land, stale ones are refused.
        a.put_record(&record("ada", 1)).unwrap();
        b.put_record(&record("grace", 1)).unwrap();
        assert!(matches!(
            b.put_record(&record("ada", 1)),
            Err(StoreError::Conflict { .. })
        ));

        let c = JsonFileStore::open(dir.path()).unwrap();
        let members: Vec<String> = c
            .records_between(day(1), day(1))
            .unwrap()
            .into_iter()
            .map(|r| r.member.as_str().to_string())
            .collect();
        assert_eq!(members, vec!["ada", "grace"]);
        assert_eq!(c.latest_records().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_handles_do_not_lose_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = Arc::new(dir.path().to_path_buf());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let root = Arc::clone(&root);
                thread::spawn(move || {
                    let store = JsonFileStore::open(root.as_path()).unwrap();
                    for d in 1..=5 {
                        store.put_record(&record(&format!("m{i}"), d)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = JsonFileStore::open(root.as_path()).unwrap();
        assert_eq!(store.records_between(day(1), day(5)).unwrap().len(), 20);
        let latest = store.latest_records().unwrap();
        assert_eq!(latest.len(), 4);
        assert!(latest.iter().all(|r| r.date == day(5)));
    }

    #[test]
    fn test_records_between_reads_only_stored_days() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        for d in [1, 3, 5] {
            store.put_record(&record("a", d)).unwrap();
        }
        std::fs::write(dir.path().join(RECORDS_DIR).join("notes.txt"), "x").unwrap();

        let dates: Vec<NaiveDate> = store
            .records_between(day(2), day(5))
            .unwrap()
            .into_iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![day(3), day(5)]);
        assert!(store.records_between(day(5), day(1)).unwrap().is_empty());

        let far = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        assert_eq!(store.records_between(far, day(31)).unwrap().len(), 3);
    }

    #[test]
    fn test_failed_write_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let saved = store.put_record(&record("m", 1)).unwrap();

        // A directory where the temporary file goes makes the write fail.
        std::fs::create_dir(store.day_path(day(1)).with_extension("json.tmp")).unwrap();

        let mut next = saved.clone();
        next.apply_sighting(
            "lab",
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 3, 0).unwrap(),
            Duration::minutes(5),
        );
        assert!(matches!(store.put_record(&next), Err(StoreError::Io(_))));

        let loaded = store.get_record(&"m".into(), day(1)).unwrap().unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.duration(), Duration::zero());

        std::fs::create_dir(dir.path().join("modules.json.tmp")).unwrap();
        let module = Module::new("lab", "X", Seed::new(11).unwrap(), 10).unwrap();
        assert!(store.put_module(&module).is_err());
        assert!(store.get_module("lab").unwrap().is_none());
    }
}
