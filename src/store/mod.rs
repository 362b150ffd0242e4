//! Record store boundary.
//!
//! The attendance core only talks to persistence through [`RecordStore`].
//! Two implementations are provided:
//! - [`MemoryStore`]: in-process, for tests and embedding
//! - [`JsonFileStore`]: a directory of JSON files shared between processes
//!
//! Modules and attendance records carry a version. `put_module` and
//! `put_record` only succeed when the caller's copy is at the stored version,
//! which lets writers detect that it changed between their read and their
//! write.

pub mod file;
pub mod memory;

mod state;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::core::{AttendanceRecord, MemberId};
use crate::error::StoreError;
use crate::rotation::Module;
use chrono::NaiveDate;
use std::sync::Arc;

/// Persistence for modules and attendance records.
pub trait RecordStore: Send + Sync {
    fn get_module(&self, name: &str) -> Result<Option<Module>, StoreError>;

    /// Insert or replace a module by name, as one atomic write.
    ///
    /// Fails with [`StoreError::ModuleConflict`] unless `module.version()`
    /// equals the stored version (0 when nothing is stored). Returns the
    /// stored copy with its new version.
    fn put_module(&self, module: &Module) -> Result<Module, StoreError>;

    fn list_modules(&self) -> Result<Vec<Module>, StoreError>;

    fn get_record(
        &self,
        member: &MemberId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Insert or replace the record for `(record.member, record.date)`.
    ///
    /// Fails with [`StoreError::Conflict`] unless `record.version()` equals
    /// the stored version (0 when nothing is stored). Returns the stored copy
    /// with its new version.
    fn put_record(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, StoreError>;

    /// All records with `start <= date <= end`, ordered by date then member.
    fn records_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// The member's record with the latest date.
    fn latest_record(&self, member: &MemberId) -> Result<Option<AttendanceRecord>, StoreError>;

    /// The latest-dated record of every member.
    fn latest_records(&self) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Store handle shared by the scheduler, accumulator and aggregator.
pub type SharedStore = Arc<dyn RecordStore>;
