//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). Enables
//! deterministic simulation (virtual clock, seeded RNG) in tests and production
//! use with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time (e.g., `tokio::time::Instant` with a
    /// paused clock).
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;

    /// Milliseconds since the Unix epoch.
    ///
    /// Used for record timestamps (`createdAt`, `expiresAt`) that other peers
    /// compare against their own clocks.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only timer tasks call this; protocol logic never waits on time.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Uniform random index in `0..bound`.
    ///
    /// Uses rejection sampling over single bytes, so `bound` must be in
    /// `1..=256`. Every index is equiprobable.
    fn random_index(&self, bound: usize) -> usize {
        debug_assert!((1..=256).contains(&bound));

        // Largest multiple of `bound` that fits in a byte's range
        let limit = 256 - (256 % bound);
        let mut byte = [0u8; 1];
        loop {
            self.random_bytes(&mut byte);
            let value = usize::from(byte[0]);
            if value < limit {
                return value % bound;
            }
        }
    }

    /// Random integer in `low..high` (exclusive), for decoy lengths.
    ///
    /// Not bias-free for large ranges; only used for non-secret sizes.
    fn random_range(&self, low: usize, high: usize) -> usize {
        debug_assert!(low < high);
        low + (self.random_u64() % (high - low) as u64) as usize
    }
}
