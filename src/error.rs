//! Error types for rotation, sighting recording and aggregation.

use crate::core::MemberId;
use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record was written by someone else since it was read.
    #[error("record for {member} on {date} changed underneath us (expected version {expected}, found {found})")]
    Conflict {
        member: MemberId,
        date: NaiveDate,
        expected: u64,
        found: u64,
    },

    /// The module was written by someone else since it was read.
    #[error("module {module} changed underneath us (expected version {expected}, found {found})")]
    ModuleConflict {
        module: String,
        expected: u64,
        found: u64,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether re-reading and retrying the write can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::ModuleConflict { .. }
        )
    }
}

/// Errors raised by the attendance core.
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Invalid administrative input such as an out-of-domain seed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed range query.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Unrecognised ordering key for member statistics.
    #[error("invalid order key: {0:?}")]
    InvalidOrder(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("module already exists: {0}")]
    ModuleExists(String),

    /// A reported identifier does not match any module's current identifier.
    #[error("identifier {0:?} is not currently published by any module")]
    UnknownIdentifier(String),

    #[error("gave up merging sighting for {member} on {date} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        member: MemberId,
        date: NaiveDate,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_record() {
        let err = StoreError::Conflict {
            member: MemberId::new("alice"),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            expected: 2,
            found: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("2024-01-01"));
    }

    #[test]
    fn test_store_error_converts() {
        let io = std::io::Error::other("disk full");
        let err: AttendanceError = StoreError::from(io).into();
        assert!(matches!(err, AttendanceError::Store(StoreError::Io(_))));
    }
}
