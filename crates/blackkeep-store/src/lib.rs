//! Shared store interface for the Blackkeep rendezvous protocol
//!
//! Every peer talks to one shared, replicated key-value tree. This crate
//! defines what the protocol needs from it ([`Store`]) and ships an
//! in-process model of it ([`MemoryStore`]) plus a fault injector
//! ([`ChaoticStore`]).
//!
//! Paths are slash-separated; a value may sit at a path that also has
//! children (`rooms/{code}` holds room metadata while
//! `rooms/{code}/members/{peer}` holds member entries). Removing a path
//! removes its whole subtree.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cbor;
mod chaotic;
mod error;
mod memory;
mod path;
mod subscription;

use async_trait::async_trait;
use bytes::Bytes;
pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::{DEFAULT_RETRY_BUDGET, MemoryConnection, MemoryStore};
pub use path::StorePath;
pub use subscription::{ChildAdded, Subscription};

/// A value together with the version it was read at.
///
/// Version 0 means the path holds no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Current value
    pub value: Option<Bytes>,
    /// Commit version of `value`
    pub version: u64,
}

/// What a transaction closure wants done with the value it was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxDecision {
    /// Leave the value untouched and stop
    Abort,
    /// Replace the value
    Set(Bytes),
    /// Remove the value (not its children)
    Delete,
}

/// Result of a committed or aborted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The decision was written
    Committed {
        /// Value now stored
        value: Option<Bytes>,
    },
    /// The closure aborted
    Aborted {
        /// Value the closure saw last
        current: Option<Bytes>,
    },
}

/// Operations the protocol consumes from the shared store.
///
/// Must be Clone (handed to several components), Send + Sync (used from
/// spawned tasks). Implementations share state behind the handle, so clones
/// act on the same connection.
///
/// Apart from [`Store::transaction`] and [`Store::compare_and_update`], writes
/// are independent per path; there is no cross-path ordering for subscribers.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Point read.
    async fn get(&self, path: &StorePath) -> Result<Option<Bytes>, StoreError>;

    /// Point read with the commit version, for compare-and-set.
    async fn get_versioned(&self, path: &StorePath) -> Result<Versioned, StoreError>;

    /// Direct children of `parent` as `(key, value)`, in key order.
    async fn children(&self, parent: &StorePath) -> Result<Vec<(String, Bytes)>, StoreError>;

    /// Point write.
    async fn set(&self, path: &StorePath, value: Bytes) -> Result<(), StoreError>;

    /// Partial update: several independent writes committed together.
    ///
    /// `None` removes the path's subtree.
    async fn update(&self, writes: Vec<(StorePath, Option<Bytes>)>) -> Result<(), StoreError>;

    /// Append under `parent` with a store-generated, time-ordered key.
    ///
    /// Keys sort lexicographically in creation order.
    async fn push(&self, parent: &StorePath, value: Bytes) -> Result<StorePath, StoreError>;

    /// Remove `path` and everything beneath it. Removing nothing succeeds.
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Write `value` only if the path is still at `expected_version`.
    ///
    /// Returns `false` on a version mismatch. `None` deletes the value but
    /// keeps any children.
    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected_version: u64,
        value: Option<Bytes>,
    ) -> Result<bool, StoreError>;

    /// Commit `writes` together, only if `guard` is still at `expected_version`.
    ///
    /// Returns `false` on a version mismatch, in which case nothing is
    /// written. `guard` need not be one of the written paths. `None` removes
    /// the path's subtree, as in [`Store::update`].
    async fn compare_and_update(
        &self,
        guard: &StorePath,
        expected_version: u64,
        writes: Vec<(StorePath, Option<Bytes>)>,
    ) -> Result<bool, StoreError>;

    /// Children added directly beneath `parent`.
    ///
    /// Existing children are replayed first, in key order.
    async fn subscribe_child_added(
        &self,
        parent: &StorePath,
    ) -> Result<Subscription<ChildAdded>, StoreError>;

    /// Every change of the value at `path`; the current value is sent first.
    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<Option<Bytes>>, StoreError>;

    /// Remove `path` when this connection goes away.
    ///
    /// The hook is dropped once `path` is removed by any other means.
    async fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Server clock, milliseconds since the Unix epoch.
    ///
    /// Timestamps that several peers compare come from here, not from the
    /// local clock.
    fn server_time(&self) -> u64;

    /// Attempts a transaction makes before reporting a conflict.
    fn retry_budget(&self) -> u32;

    /// Atomic read-modify-write of one path.
    ///
    /// `decide` sees the current value and may be called several times:
    /// whenever another writer commits between the read and the write, the
    /// attempt is discarded and repeated against the fresh value. Exactly one
    /// decision takes effect per call.
    ///
    /// # Errors
    ///
    /// - `TransactionConflict`: lost [`Store::retry_budget`] races in a row
    /// - Any error from the underlying read or write
    async fn transaction<F>(&self, path: &StorePath, mut decide: F) -> Result<TxOutcome, StoreError>
    where
        F: FnMut(Option<&[u8]>) -> TxDecision + Send,
    {
        let budget = self.retry_budget().max(1);

        for attempt in 1..=budget {
            let current = self.get_versioned(path).await?;
            let next = match decide(current.value.as_deref()) {
                TxDecision::Abort => return Ok(TxOutcome::Aborted { current: current.value }),
                TxDecision::Set(value) => Some(value),
                TxDecision::Delete => None,
            };

            if self.compare_and_set(path, current.version, next.clone()).await? {
                return Ok(TxOutcome::Committed { value: next });
            }
            tracing::trace!(%path, attempt, "transaction conflict, retrying");
        }

        Err(StoreError::TransactionConflict { path: path.to_string(), attempts: budget })
    }
}
