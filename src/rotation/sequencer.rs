//! Seed chain behind the rotating beacon identifiers.
//!
//! Each rotation replaces a module's seed with `next(seed)`. The chain is a
//! Lehmer multiplicative generator over the Mersenne prime `2^31 - 1`, so a
//! seed in `1..=2^31 - 2` always maps to another seed in that range.

use crate::error::{AttendanceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prime modulus of the chain.
pub const MODULUS: u64 = 2_147_483_647;

/// Multiplier of the chain (a primitive root modulo [`MODULUS`]).
pub const MULTIPLIER: u64 = 48_271;

/// A seed inside the valid domain `1..MODULUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Seed(u32);

impl Seed {
    /// Validate a seed supplied by an administrator.
    pub fn new(value: u64) -> Result<Self> {
        if value == 0 || value >= MODULUS {
            return Err(AttendanceError::Configuration(format!(
                "seed {value} is outside 1..={}",
                MODULUS - 1
            )));
        }
        Ok(Self(value as u32))
    }

    pub fn value(self) -> u64 {
        u64::from(self.0)
    }
}

impl TryFrom<u64> for Seed {
    type Error = AttendanceError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Seed> for u64 {
    fn from(seed: Seed) -> u64 {
        seed.value()
    }
}

/// Plain decimal, no padding. Scanning devices match on this form.
impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces the next seed of a chain. Implementations must be pure.
pub trait SeedSequencer: Send + Sync {
    fn next(&self, seed: Seed) -> Seed;
}

/// The default chain: `next = seed * 48271 mod (2^31 - 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LehmerSequencer;

impl SeedSequencer for LehmerSequencer {
    fn next(&self, seed: Seed) -> Seed {
        // seed < 2^31 and MULTIPLIER < 2^16, so the product fits in u64. The
        // modulus is prime and neither factor is a multiple of it, so the
        // result is never zero.
        Seed(((seed.value() * MULTIPLIER) % MODULUS) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_deterministic() {
        let sequencer = LehmerSequencer;
        for raw in [1, 2, 42, 48_271, 1_000_000_007 % MODULUS, MODULUS - 1] {
            let seed = Seed::new(raw).unwrap();
            assert_eq!(sequencer.next(seed), sequencer.next(seed));
        }
    }

    #[test]
    fn test_known_values() {
        let sequencer = LehmerSequencer;
        let first = sequencer.next(Seed::new(1).unwrap());
        assert_eq!(first.value(), 48_271);
        assert_eq!(sequencer.next(first).value(), 182_605_794);
    }

    #[test]
    fn test_chain_stays_in_domain() {
        let sequencer = LehmerSequencer;
        let mut seed = Seed::new(MODULUS - 1).unwrap();
        for _ in 0..1_000 {
            seed = sequencer.next(seed);
            assert!(seed.value() >= 1 && seed.value() < MODULUS);
        }
    }

    #[test]
    fn test_out_of_domain_seeds_rejected() {
        assert!(matches!(
            Seed::new(0),
            Err(AttendanceError::Configuration(_))
        ));
        assert!(Seed::new(MODULUS).is_err());
        assert!(Seed::new(u64::MAX).is_err());
    }

    #[test]
    fn test_seed_serde_validates() {
        let seed: Seed = serde_json::from_str("12345").unwrap();
        assert_eq!(seed.value(), 12_345);
        assert_eq!(serde_json::to_string(&seed).unwrap(), "12345");
        assert!(serde_json::from_str::<Seed>("0").is_err());
    }

    #[test]
    fn test_display_is_unpadded_decimal() {
        assert_eq!(Seed::new(7).unwrap().to_string(), "7");
    }
}
