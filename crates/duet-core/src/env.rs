//! Environment abstraction for deterministic testing.
//!
//! Decouples engines from system resources (time, randomness). A simulated
//! network hands every engine a seeded environment with a virtual clock so a
//! whole session replays from one seed; a real engine uses [`SystemEnv`].

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use rand::{RngCore, rngs::OsRng};

/// Time and randomness provider.
///
/// # Invariants
///
/// - `now()` never goes backwards.
/// - Given the same seed, a simulated environment produces the same byte
///   sequence from `random_bytes`.
pub trait Environment: Send + Sync + 'static {
    /// Monotonic time since the environment was created.
    fn now(&self) -> Duration;

    /// Wall-clock seconds since the Unix epoch.
    fn unix_time(&self) -> u64;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// A random `u32`.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// A random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

impl<E: Environment + ?Sized> Environment for Arc<E> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn unix_time(&self) -> u64 {
        (**self).unix_time()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        (**self).random_bytes(buffer);
    }
}

/// Real clock and OS entropy.
#[derive(Debug, Clone)]
pub struct SystemEnv {
    origin: Instant,
}

impl SystemEnv {
    /// Environment whose monotonic clock starts now.
    #[allow(clippy::disallowed_methods)]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    #[allow(clippy::disallowed_methods)]
    fn unix_time(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let env = SystemEnv::new();
        let a = env.now();
        let b = env.now();
        assert!(b >= a);
        assert!(env.unix_time() > 0);
    }

    #[test]
    fn system_entropy_fills_buffer() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn shared_env_delegates() {
        let env: Arc<dyn Environment> = Arc::new(SystemEnv::new());
        assert!(env.unix_time() > 0);
    }
}
