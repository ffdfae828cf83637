//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (time, randomness). Enables
//! deterministic simulation with a virtual clock and seeded RNG, and production
//! use with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` is unpredictable in production (message ids double as
///   idempotency keys)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production uses the tokio clock so that paused-time tests and real
    /// runs share one code path; simulations may use any monotonic type.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (timers, reconnect backoff) awaits this; state
    /// machines never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time in Unix milliseconds, used for message timestamps.
    fn wall_clock_millis(&self) -> u64;

    /// Generates a random `u128`.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

/// Manual environment for unit tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::Environment;

    /// Wall clock at `now() == 0`: 2023-11-14T22:13:20Z.
    const EPOCH_MILLIS: u64 = 1_700_000_000_000;

    /// Environment whose clock only moves when told to.
    ///
    /// `Instant` is the elapsed time since creation. `sleep` advances the
    /// clock and completes immediately. Random bytes come from a counter
    /// run through splitmix64, so ids are distinct and reproducible.
    #[derive(Clone, Default)]
    pub struct MockEnv {
        clock_ms: Arc<AtomicU64>,
        rng_state: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Create an environment at time zero.
        pub fn new() -> Self {
            Self::default()
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            self.clock_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for MockEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.clock_ms.load(Ordering::SeqCst))
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for chunk in buffer.chunks_mut(8) {
                let mut z = self.rng_state.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::SeqCst);
                z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
                z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
                z ^= z >> 31;
                chunk.copy_from_slice(&z.to_le_bytes()[..chunk.len()]);
            }
        }

        fn wall_clock_millis(&self) -> u64 {
            EPOCH_MILLIS + self.clock_ms.load(Ordering::SeqCst)
        }
    }
}
