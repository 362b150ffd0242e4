//! Beacon Attendance - presence tracking through rotating network identifiers.
//!
//! Each organizational module publishes a wireless identifier that rotates on
//! a fixed interval along a secret seed chain. Member devices report the
//! identifier they currently see; the server turns those reports into
//! per-member, per-day session lists and answers attendance queries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Beacon Attendance                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐                            │
//! │  │    Seed     │──▶│  Rotation   │──▶ operator events         │
//! │  │  Sequencer  │   │  Scheduler  │                            │
//! │  └─────────────┘   └─────────────┘                            │
//! │                           │                                   │
//! │                           ▼                                   │
//! │  reports ──▶ ┌─────────────┐   ┌─────────────┐   ┌─────────┐  │
//! │              │   Session   │──▶│   Record    │──▶│Aggregat-│  │
//! │              │ Accumulator │   │    Store    │   │   or    │  │
//! │              └─────────────┘   └─────────────┘   └─────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use beacon_attendance::{
//!     AttendanceAggregator, Directory, MemberId, MemoryStore, Module, RotationScheduler,
//!     Seed, SessionAccumulator, SharedStore,
//! };
//! use chrono::{Duration, TimeZone, Utc};
//! use std::sync::Arc;
//!
//! let store: SharedStore = Arc::new(MemoryStore::new());
//! let scheduler = RotationScheduler::new(Arc::clone(&store));
//! scheduler
//!     .register(Module::new("lab", "amFOSS_", Seed::new(1).unwrap(), 10).unwrap())
//!     .unwrap();
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
//! scheduler.tick("lab", now).unwrap();
//! let identifier = scheduler.module("lab").unwrap().published_identifier().to_string();
//!
//! let accumulator =
//!     SessionAccumulator::new(Arc::clone(&store), chrono_tz::UTC, Duration::minutes(5));
//! accumulator.record_report(&MemberId::new("alice"), &identifier, now).unwrap();
//!
//! let aggregator = AttendanceAggregator::new(store, Arc::new(Directory::new()), chrono_tz::UTC);
//! assert_eq!(aggregator.live_presence(now, None).unwrap().count, 1);
//! ```

pub mod activity;
pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod rotation;
pub mod store;
pub mod sync;

// Re-export key types at crate root for convenience
pub use activity::{ActivityLog, ActivityStats, SharedActivityLog};
pub use config::{Config, ConfigError};
pub use core::{
    AttendanceAggregator, AttendanceRecord, MemberId, Session, SessionAccumulator, StatsOrder,
};
pub use error::{AttendanceError, Result, StoreError};
pub use identity::{Directory, IdentityStore, MemberIdentity};
pub use rotation::{
    LehmerSequencer, Module, RotationEvent, RotationScheduler, Seed, SeedSequencer,
};
pub use store::{JsonFileStore, MemoryStore, RecordStore, SharedStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
