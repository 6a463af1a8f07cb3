//! Seeded environment with a virtual clock.
//!
//! Randomness comes from one `ChaCha8Rng`, so identical seeds produce
//! identical keys, nospams and file ids. Time only moves when the simulated
//! network advances it.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use duet_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Unix time the virtual clock starts at.
const EPOCH_SECS: u64 = 1_700_000_000;

/// Deterministic [`Environment`] for simulated sessions.
#[derive(Debug)]
pub struct SimEnv {
    rng: Mutex<ChaCha8Rng>,
    clock_micros: AtomicU64,
}

impl SimEnv {
    /// Environment whose randomness replays from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)), clock_micros: AtomicU64::new(0) }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock_micros.fetch_add(by.as_micros() as u64, Ordering::Relaxed);
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Duration {
        Duration::from_micros(self.clock_micros.load(Ordering::Relaxed))
    }

    fn unix_time(&self) -> u64 {
        EPOCH_SECS + self.now().as_secs()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(9);
        let b = SimEnv::with_seed(9);
        assert_eq!(a.random_u64(), b.random_u64());
        assert_ne!(a.random_u64(), SimEnv::with_seed(10).random_u64());
    }

    #[test]
    fn clock_only_moves_when_advanced() {
        let env = SimEnv::with_seed(0);
        assert_eq!(env.now(), Duration::ZERO);
        assert_eq!(env.unix_time(), EPOCH_SECS);

        env.advance(Duration::from_millis(2500));
        assert_eq!(env.now(), Duration::from_millis(2500));
        assert_eq!(env.unix_time(), EPOCH_SECS + 2);
    }
}
