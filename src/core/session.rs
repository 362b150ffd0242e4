//! Presence spans and the gap-merge rule.
//!
//! A member's sightings on one day collapse into sessions: a sighting within
//! the merge threshold of a session extends it, anything further away opens a
//! new one. Sightings may arrive in any order, so a new sighting is inserted
//! by start time and the whole list is re-coalesced.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One continuous presence span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Session {
    /// A zero-length session at a single sighting.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            start: timestamp,
            end: timestamp,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if a timestamp falls within this session (inclusive).
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// How a sighting changed a session list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingEffect {
    /// A new session was opened.
    Opened,
    /// An existing session grew, or two sessions were bridged.
    Extended,
    /// The sighting fell inside an existing session.
    Unchanged,
}

/// Merge a sighting at `timestamp` into `sessions`.
///
/// `sessions` must be sorted by start with every gap above `threshold`; the
/// same holds on return.
pub fn merge_sighting(
    sessions: &mut Vec<Session>,
    timestamp: DateTime<Utc>,
    threshold: Duration,
) -> SightingEffect {
    let before = sessions.len();
    if sessions.iter().any(|s| s.contains(timestamp)) {
        return SightingEffect::Unchanged;
    }

    let position = sessions.partition_point(|s| s.start <= timestamp);
    sessions.insert(position, Session::at(timestamp));
    coalesce(sessions, threshold);

    if sessions.len() > before {
        SightingEffect::Opened
    } else {
        SightingEffect::Extended
    }
}

/// Merge neighbours whose gap is within `threshold`. Input must be sorted by
/// start.
fn coalesce(sessions: &mut Vec<Session>, threshold: Duration) {
    let mut merged: Vec<Session> = Vec::with_capacity(sessions.len());
    for session in sessions.drain(..) {
        match merged.last_mut() {
            Some(last) if session.start - last.end <= threshold => {
                last.end = last.end.max(session.end);
            }
            _ => merged.push(session),
        }
    }
    *sessions = merged;
}

/// Repair a session list from an untrusted source: swap inverted spans,
/// sort by start and merge sessions that overlap or touch.
pub fn normalize(sessions: &mut Vec<Session>) {
    for session in sessions.iter_mut() {
        if session.end < session.start {
            std::mem::swap(&mut session.start, &mut session.end);
        }
    }
    sessions.sort_by_key(|s| s.start);
    coalesce(sessions, Duration::zero());
}

/// Sum of span lengths.
pub fn total_duration(sessions: &[Session]) -> Duration {
    sessions
        .iter()
        .fold(Duration::zero(), |acc, s| acc + s.duration())
}
