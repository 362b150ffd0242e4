//! Activity accounting for the attendance server.
//!
//! Operators use these counters to confirm that sightings are arriving and
//! that rotations are landing.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, ActivityLog, ActivityStats,
    SharedActivityLog,
};
