//! Attendance core.
//!
//! This module contains:
//! - Session lists and the gap-merge rule for sightings
//! - Per-member, per-day attendance records
//! - The accumulator that merges sightings into stored records
//! - The aggregator that answers daily, range, live and per-member queries

pub mod accumulator;
pub mod aggregator;
pub mod record;
pub mod session;

pub use accumulator::{SessionAccumulator, DEFAULT_MAX_MERGE_RETRIES};
pub use aggregator::{
    AttendanceAggregator, DailySummary, LiveMember, LivePresence, MemberAttendance,
    MemberCurrentDay, MemberDay, MemberStats, RangeSummary, SessionSpan, StatsKey, StatsOrder,
    DEFAULT_LIVE_WINDOW_MINUTES,
};
pub use record::{AttendanceRecord, MemberId};
pub use session::{merge_sighting, normalize, total_duration, Session, SightingEffect};
