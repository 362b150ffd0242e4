//! Indexed store contents for the in-memory store, and the version checks
//! every store applies before a write.

use crate::core::{AttendanceRecord, MemberId};
use crate::error::StoreError;
use crate::rotation::Module;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Stored copy of `module` after checking it against `found`.
pub(crate) fn next_module(module: &Module, found: Option<&Module>) -> Result<Module, StoreError> {
    let found = found.map(Module::version).unwrap_or(0);
    if found != module.version() {
        return Err(StoreError::ModuleConflict {
            module: module.name().to_string(),
            expected: module.version(),
            found,
        });
    }
    Ok(module.clone().with_version(found + 1))
}

/// Stored copy of `record` after checking it against `found`.
pub(crate) fn next_record(
    record: &AttendanceRecord,
    found: Option<&AttendanceRecord>,
) -> Result<AttendanceRecord, StoreError> {
    let found = found.map(AttendanceRecord::version).unwrap_or(0);
    if found != record.version() {
        return Err(StoreError::Conflict {
            member: record.member.clone(),
            date: record.date,
            expected: record.version(),
            found,
        });
    }
    Ok(record.clone().with_version(found + 1))
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    modules: BTreeMap<String, Module>,
    /// Records by date first so range scans touch only the requested days.
    records: BTreeMap<NaiveDate, BTreeMap<MemberId, AttendanceRecord>>,
    /// Latest date with a record, per member.
    latest: HashMap<MemberId, NaiveDate>,
}

impl StoreState {
    pub fn get_module(&self, name: &str) -> Option<Module> {
        self.modules.get(name).cloned()
    }

    pub fn put_module(&mut self, module: &Module) -> Result<Module, StoreError> {
        let stored = next_module(module, self.modules.get(module.name()))?;
        self.modules
            .insert(stored.name().to_string(), stored.clone());
        Ok(stored)
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.modules.values().cloned().collect()
    }

    pub fn get_record(&self, member: &MemberId, date: NaiveDate) -> Option<AttendanceRecord> {
        self.records
            .get(&date)
            .and_then(|by_member| by_member.get(member))
            .cloned()
    }

    pub fn put_record(&mut self, record: &AttendanceRecord) -> Result<AttendanceRecord, StoreError> {
        let found = self
            .records
            .get(&record.date)
            .and_then(|by_member| by_member.get(&record.member));
        let stored = next_record(record, found)?;
        self.insert_record(stored.clone());
        Ok(stored)
    }

    pub fn records_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<AttendanceRecord> {
        if end < start {
            return Vec::new();
        }
        self.records
            .range(start..=end)
            .flat_map(|(_, by_member)| by_member.values().cloned())
            .collect()
    }

    pub fn latest_record(&self, member: &MemberId) -> Option<AttendanceRecord> {
        self.latest
            .get(member)
            .and_then(|date| self.get_record(member, *date))
    }

    pub fn latest_records(&self) -> Vec<AttendanceRecord> {
        let mut records: Vec<AttendanceRecord> = self
            .latest
            .iter()
            .filter_map(|(member, date)| self.get_record(member, *date))
            .collect();
        records.sort_by(|a, b| a.member.cmp(&b.member));
        records
    }

    fn insert_record(&mut self, record: AttendanceRecord) {
        let latest = self
            .latest
            .entry(record.member.clone())
            .or_insert(record.date);
        if record.date > *latest {
            *latest = record.date;
        }
        self.records
            .entry(record.date)
            .or_default()
            .insert(record.member.clone(), record);
    }
}
