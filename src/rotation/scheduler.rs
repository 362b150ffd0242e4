//! Rotation of module identifiers.
//!
//! Every module is either `Active` or `Paused`. An active module rotates on
//! the first tick at least `refresh_interval_minutes` after its last rotation;
//! a paused module observes ticks without changing. Pausing is only ever an
//! administrative action.
//!
//! A rotation is built as a complete new [`Module`] value and written to the
//! record store in one `put_module` call, so the seed, identifier and refresh
//! time land together or not at all. Outcomes are published on an operator
//! channel so a rotation that failed to persist is never silent.
//!
//! Module writes are version-checked by the store. When another writer (for
//! example an administrator in a different process) changed the module
//! between our read and our write, the change is re-planned against a fresh
//! read, so a pause or seed edit is never overwritten by a stale rotation.

use super::module::{Module, ModuleState};
use super::sequencer::{LehmerSequencer, Seed, SeedSequencer};
use crate::activity::SharedActivityLog;
use crate::error::{AttendanceError, Result, StoreError};
use crate::store::SharedStore;
use crate::sync::KeyedLocks;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// Attempts at a module write before a version conflict is reported.
pub const MAX_MODULE_ATTEMPTS: u32 = 5;

/// What caused a rotation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationCause {
    /// The refresh interval elapsed.
    Scheduled,
    /// An administrator submitted a new seed.
    SeedEdit,
}

/// Event published to the operator channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RotationEvent {
    Rotated {
        module: String,
        identifier: String,
        at: DateTime<Utc>,
        cause: RotationCause,
    },
    Failed {
        module: String,
        cause: RotationCause,
        error: String,
    },
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Rotated(Module),
    NotDue,
    Paused,
}

/// What a planned module change turned into.
enum Change<T> {
    /// Nothing to write.
    Skip(T),
    /// The stored module after the write.
    Written(Module),
}

/// Result of an administrative seed edit.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedEdit {
    /// The seed was already in effect; nothing changed.
    Unchanged,
    /// Active module: rotated immediately from the new seed.
    Rotated(Module),
    /// Paused module: seed and identifier stored, no rotation.
    Stored(Module),
}

/// Drives rotation for every module in the record store.
pub struct RotationScheduler {
    store: SharedStore,
    sequencer: Box<dyn SeedSequencer>,
    events: Option<Sender<RotationEvent>>,
    activity: Option<SharedActivityLog>,
    locks: KeyedLocks<String>,
}

impl RotationScheduler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            sequencer: Box::new(LehmerSequencer),
            events: None,
            activity: None,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_sequencer(mut self, sequencer: impl SeedSequencer + 'static) -> Self {
        self.sequencer = Box::new(sequencer);
        self
    }

    /// Publish rotation outcomes on `events`.
    pub fn with_events(mut self, events: Sender<RotationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_activity_log(mut self, activity: SharedActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Register a new module. It is due for rotation on its first tick.
    pub fn register(&self, module: Module) -> Result<Module> {
        let name = module.name().to_string();
        self.locks.with_lock(name.clone(), || {
            match self.store.put_module(&module) {
                Ok(stored) => {
                    tracing::info!(module = %name, identifier = stored.published_identifier(), "module registered");
                    Ok(stored)
                }
                Err(StoreError::ModuleConflict { .. }) => Err(AttendanceError::ModuleExists(name.clone())),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn module(&self, name: &str) -> Result<Module> {
        self.store
            .get_module(name)?
            .ok_or_else(|| AttendanceError::ModuleNotFound(name.to_string()))
    }

    pub fn modules(&self) -> Result<Vec<Module>> {
        Ok(self.store.list_modules()?)
    }

    /// Observe one tick for `name` at `now`.
    pub fn tick(&self, name: &str, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.locks.with_lock(name.to_string(), || {
            let change = self.update(name, |module| match module.state() {
                ModuleState::Paused => Ok(Change::Skip(TickOutcome::Paused)),
                ModuleState::Active if !module.is_due(now) => Ok(Change::Skip(TickOutcome::NotDue)),
                ModuleState::Active => {
                    let next = self.sequencer.next(module.seed());
                    Ok(Change::Written(module.rotated(next, now)))
                }
            });
            match self.settle(name, RotationCause::Scheduled, change)? {
                Change::Skip(outcome) => Ok(outcome),
                Change::Written(module) => Ok(TickOutcome::Rotated(module)),
            }
        })
    }

    /// Tick every module independently. A failure for one module does not
    /// stop the rest.
    pub fn tick_all(&self, now: DateTime<Utc>) -> Result<Vec<(String, Result<TickOutcome>)>> {
        let names: Vec<String> = self
            .store
            .list_modules()?
            .into_iter()
            .map(|m| m.name().to_string())
            .collect();

        Ok(names
            .into_iter()
            .map(|name| {
                let outcome = self.tick(&name, now);
                (name, outcome)
            })
            .collect())
    }

    /// Apply an administrative seed edit.
    ///
    /// On an active module this is an out-of-cycle rotation starting from
    /// `seed`. Resubmitting a seed that is already in effect is a no-op.
    pub fn edit_seed(&self, name: &str, seed: Seed, now: DateTime<Utc>) -> Result<SeedEdit> {
        self.locks.with_lock(name.to_string(), || {
            let mut rotating = false;
            let change = self.update(name, |module| {
                if module.has_seed_in_effect(seed) {
                    tracing::debug!(module = name, %seed, "seed already in effect");
                    return Ok(Change::Skip(()));
                }
                rotating = !module.is_paused();
                Ok(Change::Written(if rotating {
                    module.rotated_from_edit(seed, self.sequencer.next(seed), now)
                } else {
                    module.reseeded(seed)
                }))
            });

            if !rotating {
                return Ok(match change? {
                    Change::Skip(()) => SeedEdit::Unchanged,
                    Change::Written(module) => {
                        tracing::info!(module = name, identifier = module.published_identifier(), "seed updated while paused");
                        SeedEdit::Stored(module)
                    }
                });
            }
            match self.settle(name, RotationCause::SeedEdit, change)? {
                Change::Skip(()) => Ok(SeedEdit::Unchanged),
                Change::Written(module) => Ok(SeedEdit::Rotated(module)),
            }
        })
    }

    /// Pause or resume a module. Resuming does not rotate by itself.
    pub fn set_paused(&self, name: &str, paused: bool) -> Result<Module> {
        self.locks.with_lock(name.to_string(), || {
            let change = self.update(name, |module| {
                Ok(if module.is_paused() == paused {
                    Change::Skip(module.clone())
                } else {
                    Change::Written(module.with_paused(paused))
                })
            })?;
            match change {
                Change::Skip(module) => Ok(module),
                Change::Written(module) => {
                    tracing::info!(module = name, paused, "module pause toggled");
                    Ok(module)
                }
            }
        })
    }

    /// Read the module, let `plan` decide what to write, and write it. A write
    /// that loses to another writer is planned again from a fresh read.
    fn update<T>(
        &self,
        name: &str,
        mut plan: impl FnMut(&Module) -> Result<Change<T>>,
    ) -> Result<Change<T>> {
        let mut attempt = 1;
        loop {
            let module = self.module(name)?;
            let next = match plan(&module)? {
                Change::Written(next) => next,
                skip => return Ok(skip),
            };
            match self.store.put_module(&next) {
                Ok(stored) => return Ok(Change::Written(stored)),
                Err(e) if e.is_conflict() && attempt < MAX_MODULE_ATTEMPTS => {
                    tracing::warn!(module = name, attempt, "module changed concurrently, retrying: {e}");
                    if let Some(ref activity) = self.activity {
                        activity.record_conflict_retried();
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Announce the outcome of a rotation attempt.
    fn settle<T>(
        &self,
        name: &str,
        cause: RotationCause,
        change: Result<Change<T>>,
    ) -> Result<Change<T>> {
        match change {
            Ok(Change::Written(rotated)) => {
                tracing::info!(
                    module = name,
                    identifier = rotated.published_identifier(),
                    ?cause,
                    "identifier rotated"
                );
                if let Some(ref activity) = self.activity {
                    activity.record_rotation();
                }
                self.publish(RotationEvent::Rotated {
                    module: name.to_string(),
                    identifier: rotated.published_identifier().to_string(),
                    at: rotated.last_refresh_time().unwrap_or_else(Utc::now),
                    cause,
                });
                Ok(Change::Written(rotated))
            }
            Ok(skip) => Ok(skip),
            Err(AttendanceError::ModuleNotFound(missing)) => {
                Err(AttendanceError::ModuleNotFound(missing))
            }
            Err(e) => {
                tracing::error!(module = name, ?cause, "rotation rejected, previous identifier stays live: {e}");
                if let Some(ref activity) = self.activity {
                    activity.record_rotation_failed();
                }
                self.publish(RotationEvent::Failed {
                    module: name.to_string(),
                    cause,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn publish(&self, event: RotationEvent) {
        if let Some(ref events) = self.events {
            if events.send(event).is_err() {
                tracing::warn!("operator channel closed, rotation event dropped");
            }
        }
    }

    /// Start the rotation supervisor.
    ///
    /// Every `every` the supervisor lists the modules in the store and starts
    /// a timer task for each one it has not seen yet, so modules registered
    /// while running (from this process or another) get rotated too. Store
    /// access runs on the blocking pool. Everything stops once `running` is
    /// cleared; aborting the returned handle stops the timers as well.
    pub fn spawn(
        self: Arc<Self>,
        every: std::time::Duration,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timers = JoinSet::new();
            let mut known: HashSet<String> = HashSet::new();
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let scheduler = Arc::clone(&self);
                let modules = match tokio::task::spawn_blocking(move || scheduler.modules()).await {
                    Ok(Ok(modules)) => modules,
                    Ok(Err(e)) => {
                        tracing::warn!("could not list modules: {e}");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("module listing task failed: {e}");
                        continue;
                    }
                };

                for module in modules {
                    if known.insert(module.name().to_string()) {
                        tracing::info!(module = module.name(), "rotation timer started");
                        timers.spawn(Self::run_timer(
                            Arc::clone(&self),
                            module.name().to_string(),
                            every,
                            Arc::clone(&running),
                        ));
                    }
                }
            }

            while let Some(joined) = timers.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!("rotation timer ended abnormally: {e}");
                }
            }
        })
    }

    async fn run_timer(
        scheduler: Arc<Self>,
        name: String,
        every: std::time::Duration,
        running: Arc<AtomicBool>,
    ) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let ticker = Arc::clone(&scheduler);
            let module = name.clone();
            match tokio::task::spawn_blocking(move || ticker.tick(&module, Utc::now())).await {
                Ok(Ok(_)) => {}
                Ok(Err(AttendanceError::ModuleNotFound(_))) => {
                    tracing::warn!(module = %name, "module disappeared, stopping its timer");
                    break;
                }
                // Persistence failures were already reported by settle().
                Ok(Err(e)) => tracing::debug!(module = %name, "tick failed: {e}"),
                Err(e) => tracing::warn!(module = %name, "tick task failed: {e}"),
            }
        }
    }
}
