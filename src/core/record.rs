//! Per-member, per-day attendance records.

use super::session::{merge_sighting, normalize, total_duration, Session, SightingEffect};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a member in the external identity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Everything known about one member's presence on one calendar day.
///
/// Sessions, `last_seen` and `duration` only change through
/// [`AttendanceRecord::apply_sighting`], which keeps the session list sorted
/// and gap-separated and recomputes the duration. Deserialization repairs the
/// session list and recomputes the derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct AttendanceRecord {
    pub member: MemberId,
    pub date: NaiveDate,
    sessions: Vec<Session>,
    last_seen: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    duration: Duration,
    modules: BTreeSet<String>,
    /// Store version this copy was read at (0 for a record never stored).
    #[serde(default)]
    version: u64,
}

impl AttendanceRecord {
    /// Create the record for a member's first sighting of the day.
    pub fn first_sighting(
        member: MemberId,
        date: NaiveDate,
        module: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            member,
            date,
            sessions: vec![Session::at(timestamp)],
            last_seen: timestamp,
            duration: Duration::zero(),
            modules: BTreeSet::from([module.to_string()]),
            version: 0,
        }
    }

    /// Merge a sighting from `module` at `timestamp`.
    pub fn apply_sighting(
        &mut self,
        module: &str,
        timestamp: DateTime<Utc>,
        merge_threshold: Duration,
    ) -> SightingEffect {
        self.modules.insert(module.to_string());
        let effect = merge_sighting(&mut self.sessions, timestamp, merge_threshold);
        self.last_seen = self.last_seen.max(timestamp);
        self.duration = total_duration(&self.sessions);
        effect
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Start of the first session.
    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.sessions.first().map(|s| s.start)
    }

    /// End of the last session.
    pub fn last_end(&self) -> Option<DateTime<Utc>> {
        self.sessions.last().map(|s| s.end)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// On-disk shape of a record. The stored duration is ignored.
#[derive(Deserialize)]
struct StoredRecord {
    member: MemberId,
    date: NaiveDate,
    sessions: Vec<Session>,
    last_seen: DateTime<Utc>,
    #[serde(default)]
    modules: BTreeSet<String>,
    #[serde(default)]
    version: u64,
}

impl From<StoredRecord> for AttendanceRecord {
    fn from(stored: StoredRecord) -> Self {
        let mut sessions = stored.sessions;
        normalize(&mut sessions);
        let last_seen = sessions
            .last()
            .map_or(stored.last_seen, |s| stored.last_seen.max(s.end));
        Self {
            member: stored.member,
            date: stored.date,
            duration: total_duration(&sessions),
            sessions,
            last_seen,
            modules: stored.modules,
            version: stored.version,
        }
    }
}

/// Durations are stored as whole milliseconds.
fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.num_milliseconds().serialize(serializer)
}
