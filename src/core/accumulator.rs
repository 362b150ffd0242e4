//! Sighting accumulation into per-day attendance records.

use super::record::{AttendanceRecord, MemberId};
use super::session::SightingEffect;
use crate::activity::SharedActivityLog;
use crate::error::{AttendanceError, Result, StoreError};
use crate::store::SharedStore;
use crate::sync::KeyedLocks;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// Default number of attempts at merging a sighting before giving up.
pub const DEFAULT_MAX_MERGE_RETRIES: u32 = 5;

/// Turns sightings into attendance records.
///
/// Updates to one `(member, date)` record are serialized in-process. A write
/// that still loses a race at the store (another process, or a store shared
/// between accumulators) is re-read and re-merged; merging is idempotent so
/// a retry never double counts.
pub struct SessionAccumulator {
    store: SharedStore,
    timezone: Tz,
    merge_threshold: Duration,
    max_retries: u32,
    locks: KeyedLocks<(MemberId, NaiveDate)>,
    activity: Option<SharedActivityLog>,
}

impl SessionAccumulator {
    pub fn new(store: SharedStore, timezone: Tz, merge_threshold: Duration) -> Self {
        Self {
            store,
            timezone,
            merge_threshold,
            max_retries: DEFAULT_MAX_MERGE_RETRIES,
            locks: KeyedLocks::new(),
            activity: None,
        }
    }

    /// Attempts per sighting before a persistent conflict is surfaced.
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.max(1);
        self
    }

    pub fn with_activity_log(mut self, activity: SharedActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn merge_threshold(&self) -> Duration {
        self.merge_threshold
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local calendar day of `timestamp`.
    pub fn date_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.timezone).date_naive()
    }

    /// Record that `member` was seen through `module` at `timestamp`.
    pub fn record_sighting(
        &self,
        member: &MemberId,
        module: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        let date = self.date_of(timestamp);
        self.locks.with_lock((member.clone(), date), || {
            for attempt in 1..=self.max_retries {
                let (record, effect) = match self.store.get_record(member, date)? {
                    Some(mut record) => {
                        let effect = record.apply_sighting(module, timestamp, self.merge_threshold);
                        (record, effect)
                    }
                    None => (
                        AttendanceRecord::first_sighting(member.clone(), date, module, timestamp),
                        SightingEffect::Opened,
                    ),
                };

                match self.store.put_record(&record) {
                    Ok(saved) => {
                        tracing::debug!(
                            %member,
                            %date,
                            module,
                            ?effect,
                            sessions = saved.sessions().len(),
                            "sighting recorded"
                        );
                        if let Some(ref activity) = self.activity {
                            activity.record_sighting(effect == SightingEffect::Opened);
                        }
                        return Ok(saved);
                    }
                    Err(StoreError::Conflict { .. }) => {
                        tracing::warn!(%member, %date, attempt, "record changed concurrently, re-merging");
                        if let Some(ref activity) = self.activity {
                            activity.record_conflict_retried();
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Err(AttendanceError::ConflictRetriesExhausted {
                member: member.clone(),
                date,
                attempts: self.max_retries,
            })
        })
    }

    /// Record a device report of `identifier` for `member`.
    ///
    /// The identifier must be the one a module is publishing right now.
    pub fn record_report(
        &self,
        member: &MemberId,
        identifier: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        let module = self
            .store
            .list_modules()?
            .into_iter()
            .find(|m| m.published_identifier() == identifier);

        match module {
            Some(module) => self.record_sighting(member, module.name(), timestamp),
            None => {
                tracing::warn!(%member, identifier, "report for unknown or stale identifier rejected");
                if let Some(ref activity) = self.activity {
                    activity.record_report_rejected();
                }
                Err(AttendanceError::UnknownIdentifier(identifier.to_string()))
            }
        }
    }
}
