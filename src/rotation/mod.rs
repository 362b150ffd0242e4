//! Rotating module identifiers.
//!
//! - [`sequencer`]: the seed chain
//! - [`module`]: per-module rotation state
//! - [`scheduler`]: ticks, seed edits and the timer tasks

pub mod module;
pub mod scheduler;
pub mod sequencer;

pub use module::{identifier_for, Module, ModuleState};
pub use scheduler::{
    RotationCause, RotationEvent, RotationScheduler, SeedEdit, TickOutcome, MAX_MODULE_ATTEMPTS,
};
pub use sequencer::{LehmerSequencer, Seed, SeedSequencer};
