//! Simulated environment with a virtual clock and seeded randomness.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use blackkeep_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Fixed wall-clock origin for simulations (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Deterministic [`Environment`] for tests.
///
/// Time comes from tokio's clock, so under `#[tokio::test(start_paused =
/// true)]` every sleep auto-advances virtual time and `tokio::time::advance`
/// moves both the monotonic and the wall clock. Randomness comes from a
/// ChaCha20 stream seeded at construction; two `SimEnv`s with the same seed
/// produce identical byte sequences.
///
/// Clones share the RNG stream and the clock origin.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    origin: tokio::time::Instant,
    epoch_millis: u64,
}

impl SimEnv {
    /// Create an environment with the given RNG seed.
    ///
    /// The clock origin is captured now; construct inside the tokio runtime
    /// when the test relies on paused time.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            origin: tokio::time::Instant::now(),
            epoch_millis: SIM_EPOCH_MILLIS,
        }
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        tokio::time::Instant::now() - self.origin
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        self.epoch_millis + self.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
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
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        let mut bytes_a = [0u8; 64];
        let mut bytes_b = [0u8; 64];
        a.random_bytes(&mut bytes_a);
        b.random_bytes(&mut bytes_b);

        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn different_seeds_differ() {
        let mut bytes_a = [0u8; 32];
        let mut bytes_b = [0u8; 32];
        SimEnv::with_seed(1).random_bytes(&mut bytes_a);
        SimEnv::with_seed(2).random_bytes(&mut bytes_b);

        assert_ne!(bytes_a, bytes_b);
    }

    #[test]
    fn clones_share_the_stream() {
        let env = SimEnv::with_seed(3);
        let clone = env.clone();

        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        env.random_bytes(&mut first);
        clone.random_bytes(&mut second);

        assert_ne!(first, second, "clone must continue the stream, not restart it");
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_virtual_time() {
        let env = SimEnv::with_seed(0);
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS);

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS + 121_000);

        env.sleep(Duration::from_secs(4)).await;
        assert_eq!(env.elapsed(), Duration::from_secs(125));
    }

    #[test]
    fn random_index_stays_in_bounds() {
        let env = SimEnv::with_seed(11);
        for _ in 0..1000 {
            assert!(env.random_index(31) < 31);
        }
    }
}
