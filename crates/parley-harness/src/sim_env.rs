//! Simulated environment: tokio virtual clock and seeded RNG.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock at simulation start: 2023-11-14T22:13:20Z.
const EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Deterministic environment.
///
/// Time is tokio's clock, so `#[tokio::test(start_paused = true)]` makes it
/// virtual. Randomness comes from a seeded ChaCha8 stream shared by clones,
/// so message ids repeat across runs with the same seed.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    start: tokio::time::Instant,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with a fixed seed.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        EPOCH_MILLIS + self.now().duration_since(self.start).as_millis() as u64
    }
}
