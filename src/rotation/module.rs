//! Rotating-identifier configuration for one broadcast point.

use super::sequencer::Seed;
use crate::error::{AttendanceError, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Whether a module's identifier is currently rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Active,
    Paused,
}

/// One broadcast point and the identifier it currently publishes.
///
/// The published identifier is always `ssid_prefix` followed by the decimal
/// seed; it is recomputed whenever the seed changes and cannot be set on its
/// own. Deserialization recomputes it as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredModule")]
pub struct Module {
    name: String,
    ssid_prefix: String,
    seed: Seed,
    published_identifier: String,
    is_paused: bool,
    refresh_interval_minutes: u32,
    last_refresh_time: Option<DateTime<Utc>>,
    /// Seed most recently submitted by an administrator while active. A
    /// resubmission of the same value is treated as already applied.
    last_seed_edit: Option<Seed>,
    /// Store write counter, checked by `put_module`.
    version: u64,
}

impl Module {
    /// Create an active module that has never rotated.
    pub fn new(
        name: impl Into<String>,
        ssid_prefix: impl Into<String>,
        seed: Seed,
        refresh_interval_minutes: u32,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AttendanceError::Configuration(
                "module name must not be empty".to_string(),
            ));
        }
        if refresh_interval_minutes == 0 {
            return Err(AttendanceError::Configuration(format!(
                "module {name}: refresh interval must be at least one minute"
            )));
        }

        let ssid_prefix = ssid_prefix.into();
        Ok(Self {
            published_identifier: identifier_for(&ssid_prefix, seed),
            name,
            ssid_prefix,
            seed,
            is_paused: false,
            refresh_interval_minutes,
            last_refresh_time: None,
            last_seed_edit: None,
            version: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ssid_prefix(&self) -> &str {
        &self.ssid_prefix
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn published_identifier(&self) -> &str {
        &self.published_identifier
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn refresh_interval_minutes(&self) -> u32 {
        self.refresh_interval_minutes
    }

    pub fn last_refresh_time(&self) -> Option<DateTime<Utc>> {
        self.last_refresh_time
    }

    /// Number of stored writes of this module; 0 until first stored.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn with_version(self, version: u64) -> Self {
        Self { version, ..self }
    }

    pub fn state(&self) -> ModuleState {
        if self.is_paused {
            ModuleState::Paused
        } else {
            ModuleState::Active
        }
    }

    /// Whether a scheduled rotation is due at `now`. A module that has never
    /// rotated is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh_time {
            Some(last) => {
                now - last >= Duration::minutes(i64::from(self.refresh_interval_minutes))
            }
            None => true,
        }
    }

    /// Whether `seed` is already in effect, either as the current seed or as
    /// the administrative edit that produced it.
    pub(crate) fn has_seed_in_effect(&self, seed: Seed) -> bool {
        self.seed == seed || self.last_seed_edit == Some(seed)
    }

    /// The module after a rotation to `seed` at `now`.
    pub(crate) fn rotated(&self, seed: Seed, now: DateTime<Utc>) -> Self {
        Self {
            seed,
            published_identifier: identifier_for(&self.ssid_prefix, seed),
            last_refresh_time: Some(truncate_to_minute(now)),
            last_seed_edit: None,
            ..self.clone()
        }
    }

    /// The module after an administrative seed edit that rotated it.
    pub(crate) fn rotated_from_edit(&self, edited: Seed, seed: Seed, now: DateTime<Utc>) -> Self {
        Self {
            last_seed_edit: Some(edited),
            ..self.rotated(seed, now)
        }
    }

    /// The module with a new seed but no rotation (used while paused).
    pub(crate) fn reseeded(&self, seed: Seed) -> Self {
        Self {
            seed,
            published_identifier: identifier_for(&self.ssid_prefix, seed),
            last_seed_edit: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_paused(&self, paused: bool) -> Self {
        Self {
            is_paused: paused,
            ..self.clone()
        }
    }
}

/// `{prefix}{seed}` with the seed in plain decimal.
pub fn identifier_for(ssid_prefix: &str, seed: Seed) -> String {
    format!("{ssid_prefix}{seed}")
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}

/// On-disk shape of a module. The identifier is not trusted on load.
#[derive(Deserialize)]
struct StoredModule {
    name: String,
    ssid_prefix: String,
    seed: Seed,
    is_paused: bool,
    refresh_interval_minutes: u32,
    last_refresh_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_seed_edit: Option<Seed>,
    #[serde(default)]
    version: u64,
}

impl From<StoredModule> for Module {
    fn from(stored: StoredModule) -> Self {
        Self {
            published_identifier: identifier_for(&stored.ssid_prefix, stored.seed),
            name: stored.name,
            ssid_prefix: stored.ssid_prefix,
            seed: stored.seed,
            is_paused: stored.is_paused,
            refresh_interval_minutes: stored.refresh_interval_minutes,
            last_refresh_time: stored.last_refresh_time,
            last_seed_edit: stored.last_seed_edit,
            version: stored.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seed(value: u64) -> Seed {
        Seed::new(value).unwrap()
    }

    #[test]
    fn test_identifier_tracks_seed() {
        let module = Module::new("lab", "amFOSS_", seed(1234), 10).unwrap();
        assert_eq!(module.published_identifier(), "amFOSS_1234");

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let rotated = module.rotated(seed(99), now);
        assert_eq!(rotated.published_identifier(), "amFOSS_99");
    }

    #[test]
    fn test_rotation_truncates_to_minute() {
        let module = Module::new("lab", "X", seed(5), 10).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 7, 42).unwrap();
        let rotated = module.rotated(seed(6), now);
        assert_eq!(
            rotated.last_refresh_time(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 7, 0).unwrap())
        );
    }

    #[test]
    fn test_is_due() {
        let module = Module::new("lab", "X", seed(5), 10).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert!(module.is_due(t0));

        let rotated = module.rotated(seed(6), t0);
        assert!(!rotated.is_due(t0 + Duration::minutes(9)));
        assert!(rotated.is_due(t0 + Duration::minutes(10)));
    }

    #[test]
    fn test_invalid_modules_rejected() {
        assert!(Module::new("  ", "X", seed(5), 10).is_err());
        assert!(Module::new("lab", "X", seed(5), 0).is_err());
    }

    #[test]
    fn test_deserialize_recomputes_identifier() {
        let json = r#"{
            "name": "lab",
            "ssid_prefix": "net-",
            "seed": 77,
            "published_identifier": "net-tampered",
            "is_paused": true,
            "refresh_interval_minutes": 5,
            "last_refresh_time": null
        }"#;
        let module: Module = serde_json::from_str(json).unwrap();
        assert_eq!(module.published_identifier(), "net-77");
        assert_eq!(module.state(), ModuleState::Paused);
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let module = Module::new("hall", "H", seed(10), 15)
            .unwrap()
            .rotated_from_edit(seed(10), seed(482_710), now);
        let json = serde_json::to_string(&module).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, module);
    }
}
