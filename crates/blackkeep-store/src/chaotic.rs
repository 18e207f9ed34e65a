//! Chaotic store wrapper for fault injection testing
//!
//! Delegates to an underlying store but randomly fails operations and forces
//! compare-and-set conflicts. Used to check that best-effort cleanup swallows
//! failures and that transactions still commit exactly once under contention.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ChildAdded, Store, StoreError, StorePath, Subscription, Versioned};

/// Store wrapper that randomly injects failures and conflicts.
///
/// Clones share the RNG and counters.
#[derive(Clone)]
pub struct ChaoticStore<S: Store> {
    inner: S,
    /// Probability that an operation fails with `Unavailable`
    failure_rate: f64,
    /// Probability that a compare-and-set reports a conflict without writing
    conflict_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
    injected_conflicts: Arc<AtomicUsize>,
}

/// Linear congruential generator, so chaos runs are reproducible by seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in `[0.0, 1.0)`
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Store> ChaoticStore<S> {
    /// Wrap `inner` with the given failure and conflict probabilities.
    ///
    /// Rates are clamped to `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, conflict_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            conflict_rate: conflict_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total operations attempted through this wrapper.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Compare-and-set calls answered with a fake conflict.
    pub fn injected_conflicts(&self) -> usize {
        self.injected_conflicts.load(Ordering::Relaxed)
    }

    fn roll(&self, rate: f64) -> bool {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < rate
    }

    fn check(&self) -> Result<(), StoreError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        if self.roll(self.failure_rate) {
            return Err(StoreError::Unavailable("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for ChaoticStore<S> {
    async fn get(&self, path: &StorePath) -> Result<Option<Bytes>, StoreError> {
        self.check()?;
        self.inner.get(path).await
    }

    async fn get_versioned(&self, path: &StorePath) -> Result<Versioned, StoreError> {
        self.check()?;
        self.inner.get_versioned(path).await
    }

    async fn children(&self, parent: &StorePath) -> Result<Vec<(String, Bytes)>, StoreError> {
        self.check()?;
        self.inner.children(parent).await
    }

    async fn set(&self, path: &StorePath, value: Bytes) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(path, value).await
    }

    async fn update(&self, writes: Vec<(StorePath, Option<Bytes>)>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update(writes).await
    }

    async fn push(&self, parent: &StorePath, value: Bytes) -> Result<StorePath, StoreError> {
        self.check()?;
        self.inner.push(parent, value).await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(path).await
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected_version: u64,
        value: Option<Bytes>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        if self.roll(self.conflict_rate) {
            self.injected_conflicts.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.inner.compare_and_set(path, expected_version, value).await
    }

    async fn compare_and_update(
        &self,
        guard: &StorePath,
        expected_version: u64,
        writes: Vec<(StorePath, Option<Bytes>)>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        if self.roll(self.conflict_rate) {
            self.injected_conflicts.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.inner.compare_and_update(guard, expected_version, writes).await
    }

    async fn subscribe_child_added(
        &self,
        parent: &StorePath,
    ) -> Result<Subscription<ChildAdded>, StoreError> {
        self.check()?;
        self.inner.subscribe_child_added(parent).await
    }

    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<Option<Bytes>>, StoreError> {
        self.check()?;
        self.inner.subscribe_value(path).await
    }

    async fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.check()?;
        self.inner.on_disconnect_remove(path).await
    }

    fn server_time(&self) -> u64 {
        self.inner.server_time()
    }

    fn retry_budget(&self) -> u32 {
        self.inner.retry_budget()
    }
}
