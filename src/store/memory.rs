//! In-memory record store.

use super::state::StoreState;
use super::RecordStore;
use crate::core::{AttendanceRecord, MemberId};
use crate::error::StoreError;
use crate::rotation::Module;
use chrono::NaiveDate;
use parking_lot::RwLock;

/// Record store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get_module(&self, name: &str) -> Result<Option<Module>, StoreError> {
        Ok(self.state.read().get_module(name))
    }

    fn put_module(&self, module: &Module) -> Result<Module, StoreError> {
        self.state.write().put_module(module)
    }

    fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        Ok(self.state.read().list_modules())
    }

    fn get_record(
        &self,
        member: &MemberId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self.state.read().get_record(member, date))
    }

    fn put_record(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, StoreError> {
        self.state.write().put_record(record)
    }

    fn records_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.state.read().records_between(start, end))
    }

    fn latest_record(&self, member: &MemberId) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self.state.read().latest_record(member))
    }

    fn latest_records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.state.read().latest_records())
    }
}
