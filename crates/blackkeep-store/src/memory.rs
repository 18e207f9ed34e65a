//! In-process model of the shared store.
//!
//! One [`MemoryStore`] plays the server; each peer gets its own
//! [`MemoryConnection`]. Disconnect hooks belong to the connection that
//! registered them and run when that connection is closed, which is how
//! tests simulate a peer vanishing without cleaning up.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use blackkeep_core::Environment;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{ChildAdded, Store, StoreError, StorePath, Subscription, Versioned};

/// Transaction attempts per call unless configured otherwise.
pub const DEFAULT_RETRY_BUDGET: u32 = 25;

/// Shared backend for any number of [`MemoryConnection`]s.
///
/// Values live in a `BTreeMap` keyed by full path, so a subtree is one
/// contiguous key range. Every write bumps a global version counter, which
/// drives compare-and-set. Subscribers are notified while the lock is held,
/// so per-path event order equals commit order.
#[derive(Clone)]
pub struct MemoryStore<E: Environment> {
    inner: Arc<Mutex<MemoryStoreInner>>,
    env: E,
    retry_budget: u32,
}

struct Entry {
    value: Bytes,
    version: u64,
}

struct ChildWatcher {
    parent: StorePath,
    tx: mpsc::UnboundedSender<ChildAdded>,
}

struct ValueWatcher {
    path: String,
    tx: mpsc::UnboundedSender<Option<Bytes>>,
}

struct MemoryStoreInner {
    entries: BTreeMap<String, Entry>,
    next_version: u64,
    push_seq: u32,
    next_connection: u64,
    child_watchers: Vec<ChildWatcher>,
    value_watchers: Vec<ValueWatcher>,
    /// Paths to remove, per connection id
    disconnect_hooks: HashMap<u64, Vec<StorePath>>,
}

impl MemoryStoreInner {
    fn version_of(&self, path: &str) -> u64 {
        self.entries.get(path).map_or(0, |entry| entry.version)
    }

    fn write(&mut self, path: &StorePath, value: Bytes) {
        self.next_version += 1;
        let entry = Entry { value: value.clone(), version: self.next_version };
        let is_new = self.entries.insert(path.as_str().to_string(), entry).is_none();

        if is_new {
            self.notify_child_added(path.as_str(), &value);
        }
        self.notify_value(path.as_str(), Some(value));
    }

    fn apply(&mut self, writes: Vec<(StorePath, Option<Bytes>)>) {
        for (path, value) in writes {
            match value {
                Some(value) => self.write(&path, value),
                None => {
                    self.remove_subtree(&path);
                },
            }
        }
    }

    fn delete_value(&mut self, path: &str) -> bool {
        if self.entries.remove(path).is_none() {
            return false;
        }
        self.notify_value(path, None);
        true
    }

    fn remove_subtree(&mut self, path: &StorePath) -> usize {
        let doomed = self.keys_under(path);
        for key in &doomed {
            self.delete_value(key);
        }
        self.drop_hooks_under(path);
        doomed.len()
    }

    /// Forget disconnect hooks for paths that no longer exist.
    fn drop_hooks_under(&mut self, path: &StorePath) {
        for hooks in self.disconnect_hooks.values_mut() {
            hooks.retain(|hook| !path.contains(hook.as_str()));
        }
        self.disconnect_hooks.retain(|_, hooks| !hooks.is_empty());
    }

    fn keys_under(&self, path: &StorePath) -> Vec<String> {
        self.entries
            .range(path.as_str().to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(path.as_str()))
            .filter(|key| path.contains(key))
            .cloned()
            .collect()
    }

    fn direct_children(&self, parent: &StorePath) -> Vec<ChildAdded> {
        self.entries
            .range(format!("{parent}/")..)
            .take_while(|(key, _)| parent.contains(key))
            .filter_map(|(key, entry)| {
                parent
                    .direct_child_key(key)
                    .map(|child| ChildAdded { key: child.to_string(), value: entry.value.clone() })
            })
            .collect()
    }

    fn notify_child_added(&mut self, path: &str, value: &Bytes) {
        self.child_watchers.retain(|watcher| !watcher.tx.is_closed());
        for watcher in &self.child_watchers {
            if let Some(key) = watcher.parent.direct_child_key(path) {
                let _ = watcher.tx.send(ChildAdded { key: key.to_string(), value: value.clone() });
            }
        }
    }

    fn notify_value(&mut self, path: &str, value: Option<Bytes>) {
        self.value_watchers.retain(|watcher| !watcher.tx.is_closed());
        for watcher in self.value_watchers.iter().filter(|w| w.path == path) {
            let _ = watcher.tx.send(value.clone());
        }
    }
}

impl<E: Environment> MemoryStore<E> {
    /// Empty store using `env` as the server clock.
    pub fn new(env: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                entries: BTreeMap::new(),
                next_version: 0,
                push_seq: 0,
                next_connection: 0,
                child_watchers: Vec::new(),
                value_watchers: Vec::new(),
                disconnect_hooks: HashMap::new(),
            })),
            env,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Override the transaction retry budget for connections opened later.
    #[must_use]
    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts.max(1);
        self
    }

    /// Open a new peer connection.
    pub fn connection(&self) -> MemoryConnection<E> {
        let id = {
            let mut inner = self.lock();
            inner.next_connection += 1;
            inner.next_connection
        };

        MemoryConnection { store: self.clone(), id, connected: Arc::new(AtomicBool::new(true)) }
    }

    /// Value stored exactly at `path`.
    pub fn read(&self, path: &StorePath) -> Option<Bytes> {
        self.lock().entries.get(path.as_str()).map(|entry| entry.value.clone())
    }

    /// True if anything is stored at or beneath `path`.
    pub fn contains(&self, path: &StorePath) -> bool {
        !self.lock().keys_under(path).is_empty()
    }

    /// Full keys stored at or beneath `path`, in key order.
    pub fn keys_under(&self, path: &StorePath) -> Vec<String> {
        self.lock().keys_under(path)
    }

    /// Number of stored values.
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Registered disconnect hooks across all open connections.
    pub fn disconnect_hook_count(&self) -> usize {
        self.lock().disconnect_hooks.values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One peer's connection to a [`MemoryStore`].
///
/// Clones share the connection; [`MemoryConnection::disconnect`] closes it
/// for all of them.
#[derive(Clone)]
pub struct MemoryConnection<E: Environment> {
    store: MemoryStore<E>,
    id: u64,
    connected: Arc<AtomicBool>,
}

impl<E: Environment> MemoryConnection<E> {
    /// Close the connection and run its disconnect hooks.
    ///
    /// Idempotent. Every later operation fails with `Disconnected`.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut inner = self.store.lock();
        let hooks = inner.disconnect_hooks.remove(&self.id).unwrap_or_default();
        let removed: usize = hooks.iter().map(|path| inner.remove_subtree(path)).sum();
        debug!(connection = self.id, hooks = hooks.len(), removed, "connection closed");
    }

    /// False once [`MemoryConnection::disconnect`] has run.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Backend this connection talks to.
    pub fn store(&self) -> &MemoryStore<E> {
        &self.store
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() { Ok(()) } else { Err(StoreError::Disconnected) }
    }
}

#[async_trait]
impl<E: Environment> Store for MemoryConnection<E> {
    async fn get(&self, path: &StorePath) -> Result<Option<Bytes>, StoreError> {
        self.ensure_connected()?;
        Ok(self.store.read(path))
    }

    async fn get_versioned(&self, path: &StorePath) -> Result<Versioned, StoreError> {
        self.ensure_connected()?;
        let inner = self.store.lock();
        Ok(inner.entries.get(path.as_str()).map_or(
            Versioned { value: None, version: 0 },
            |entry| Versioned { value: Some(entry.value.clone()), version: entry.version },
        ))
    }

    async fn children(&self, parent: &StorePath) -> Result<Vec<(String, Bytes)>, StoreError> {
        self.ensure_connected()?;
        let inner = self.store.lock();
        Ok(inner.direct_children(parent).into_iter().map(|child| (child.key, child.value)).collect())
    }

    async fn set(&self, path: &StorePath, value: Bytes) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.store.lock().write(path, value);
        Ok(())
    }

    async fn update(&self, writes: Vec<(StorePath, Option<Bytes>)>) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.store.lock().apply(writes);
        Ok(())
    }

    async fn push(&self, parent: &StorePath, value: Bytes) -> Result<StorePath, StoreError> {
        self.ensure_connected()?;
        let millis = self.store.env.wall_clock_millis();

        let mut inner = self.store.lock();
        inner.push_seq = inner.push_seq.wrapping_add(1);
        let path = parent.child(format!("{millis:012x}{:08x}", inner.push_seq));
        inner.write(&path, value);
        Ok(path)
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.store.lock().remove_subtree(path);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected_version: u64,
        value: Option<Bytes>,
    ) -> Result<bool, StoreError> {
        // Round trip to the server: other writers may commit in between
        tokio::task::yield_now().await;
        self.ensure_connected()?;

        let mut inner = self.store.lock();
        if inner.version_of(path.as_str()) != expected_version {
            return Ok(false);
        }
        match value {
            Some(value) => inner.write(path, value),
            None => {
                inner.delete_value(path.as_str());
            },
        }
        Ok(true)
    }

    async fn compare_and_update(
        &self,
        guard: &StorePath,
        expected_version: u64,
        writes: Vec<(StorePath, Option<Bytes>)>,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        self.ensure_connected()?;

        let mut inner = self.store.lock();
        if inner.version_of(guard.as_str()) != expected_version {
            return Ok(false);
        }
        inner.apply(writes);
        Ok(true)
    }

    async fn subscribe_child_added(
        &self,
        parent: &StorePath,
    ) -> Result<Subscription<ChildAdded>, StoreError> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.store.lock();
        for child in inner.direct_children(parent) {
            let _ = tx.send(child);
        }
        inner.child_watchers.push(ChildWatcher { parent: parent.clone(), tx });
        Ok(Subscription::new(rx))
    }

    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<Option<Bytes>>, StoreError> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.store.lock();
        let current = inner.entries.get(path.as_str()).map(|entry| entry.value.clone());
        let _ = tx.send(current);
        inner.value_watchers.push(ValueWatcher { path: path.as_str().to_string(), tx });
        Ok(Subscription::new(rx))
    }

    async fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.store.lock().disconnect_hooks.entry(self.id).or_default().push(path.clone());
        Ok(())
    }

    fn server_time(&self) -> u64 {
        self.store.env.wall_clock_millis()
    }

    fn retry_budget(&self) -> u32 {
        self.store.retry_budget
    }
}

#[cfg(test)]
mod tests {
    use blackkeep_harness::SimEnv;

    use super::*;
    use crate::{TxDecision, TxOutcome};

    fn path(s: &str) -> StorePath {
        StorePath::new(s).unwrap()
    }

    fn store() -> MemoryStore<SimEnv> {
        MemoryStore::new(SimEnv::with_seed(0))
    }

    #[tokio::test]
    async fn set_get_remove_subtree() {
        let store = store();
        let conn = store.connection();

        conn.set(&path("ns/rooms/A"), Bytes::from_static(b"meta")).await.unwrap();
        conn.set(&path("ns/rooms/A/members/p"), Bytes::from_static(b"m")).await.unwrap();
        conn.set(&path("ns/rooms/AB"), Bytes::from_static(b"other")).await.unwrap();

        assert_eq!(conn.get(&path("ns/rooms/A")).await.unwrap().unwrap(), "meta");

        conn.remove(&path("ns/rooms/A")).await.unwrap();
        assert_eq!(conn.get(&path("ns/rooms/A")).await.unwrap(), None);
        assert!(!store.contains(&path("ns/rooms/A")));
        assert!(store.contains(&path("ns/rooms/AB")));

        conn.remove(&path("ns/rooms/A")).await.unwrap();
    }

    #[tokio::test]
    async fn update_applies_all_writes() {
        let store = store();
        let conn = store.connection();
        conn.set(&path("x/old/child"), Bytes::from_static(b"1")).await.unwrap();

        conn.update(vec![
            (path("x/a"), Some(Bytes::from_static(b"a"))),
            (path("x/b"), Some(Bytes::from_static(b"b"))),
            (path("x/old"), None),
        ])
        .await
        .unwrap();

        assert_eq!(store.keys_under(&path("x")), vec!["x/a".to_string(), "x/b".to_string()]);
    }

    #[tokio::test]
    async fn push_keys_are_time_ordered() {
        let store = store();
        let conn = store.connection();
        let parent = path("ns/signals");

        let first = conn.push(&parent, Bytes::from_static(b"1")).await.unwrap();
        let second = conn.push(&parent, Bytes::from_static(b"2")).await.unwrap();

        assert!(first.key() < second.key());
        assert_eq!(first.parent().unwrap(), parent);
        assert_eq!(first.key().len(), 20);
    }

    #[tokio::test]
    async fn child_added_replays_then_streams() {
        let store = store();
        let conn = store.connection();
        let parent = path("p");

        conn.set(&path("p/b"), Bytes::from_static(b"2")).await.unwrap();
        conn.set(&path("p/a"), Bytes::from_static(b"1")).await.unwrap();
        conn.set(&path("p/a/deep"), Bytes::from_static(b"x")).await.unwrap();

        let mut sub = conn.subscribe_child_added(&parent).await.unwrap();
        assert_eq!(sub.next().await.unwrap().key, "a");
        assert_eq!(sub.next().await.unwrap().key, "b");

        conn.set(&path("p/c"), Bytes::from_static(b"3")).await.unwrap();
        conn.set(&path("p/c"), Bytes::from_static(b"overwrite")).await.unwrap();
        conn.set(&path("p/d"), Bytes::from_static(b"4")).await.unwrap();

        assert_eq!(
            conn.children(&parent).await.unwrap().into_iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()]
        );

        let c = sub.next().await.unwrap();
        assert_eq!((c.key.as_str(), c.value.as_ref()), ("c", b"3".as_slice()));
        assert_eq!(sub.next().await.unwrap().key, "d");
    }

    #[tokio::test]
    async fn value_subscription_sees_current_then_changes() {
        let store = store();
        let conn = store.connection();
        let room = path("r");

        conn.set(&room, Bytes::from_static(b"v1")).await.unwrap();
        let mut sub = conn.subscribe_value(&room).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), "v1");

        conn.set(&room, Bytes::from_static(b"v2")).await.unwrap();
        conn.set(&path("r/child"), Bytes::from_static(b"ignored")).await.unwrap();
        conn.remove(&room).await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap(), "v2");
        assert_eq!(sub.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn disconnect_runs_only_own_hooks() {
        let store = store();
        let alice = store.connection();
        let bob = store.connection();

        alice.set(&path("m/alice"), Bytes::from_static(b"a")).await.unwrap();
        alice.on_disconnect_remove(&path("m/alice")).await.unwrap();
        bob.set(&path("m/bob"), Bytes::from_static(b"b")).await.unwrap();
        bob.on_disconnect_remove(&path("m/bob")).await.unwrap();
        assert_eq!(store.disconnect_hook_count(), 2);

        alice.disconnect();
        alice.disconnect();

        assert!(!store.contains(&path("m/alice")));
        assert!(store.contains(&path("m/bob")));
        assert_eq!(store.disconnect_hook_count(), 1);
        assert_eq!(alice.get(&path("m/bob")).await, Err(StoreError::Disconnected));
    }

    #[tokio::test]
    async fn transaction_abort_leaves_value() {
        let store = store();
        let conn = store.connection();
        let key = path("t");
        conn.set(&key, Bytes::from_static(b"keep")).await.unwrap();

        let outcome = conn.transaction(&key, |_| TxDecision::Abort).await.unwrap();
        assert_eq!(outcome, TxOutcome::Aborted { current: Some(Bytes::from_static(b"keep")) });
        assert_eq!(store.read(&key).unwrap(), "keep");
    }

    #[tokio::test]
    async fn concurrent_transactions_each_commit_once() {
        let store = store();
        let key = path("counter");

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let conn = store.connection();
                let key = key.clone();
                tokio::spawn(async move {
                    conn.transaction(&key, |current| {
                        let n = current.map_or(0, |b| u64::from_be_bytes(b.try_into().unwrap()));
                        TxDecision::Set(Bytes::copy_from_slice(&(n + 1).to_be_bytes()))
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            assert!(matches!(task.await.unwrap(), Ok(TxOutcome::Committed { .. })));
        }

        let value = store.read(&key).unwrap();
        assert_eq!(u64::from_be_bytes(value.as_ref().try_into().unwrap()), 10);
    }

    #[tokio::test]
    async fn stale_compare_and_set_is_rejected() {
        let store = store();
        let conn = store.connection();
        let key = path("cas");

        let before = conn.get_versioned(&key).await.unwrap();
        assert_eq!(before.version, 0);

        conn.set(&key, Bytes::from_static(b"other")).await.unwrap();
        let written =
            conn.compare_and_set(&key, before.version, Some(Bytes::from_static(b"mine"))).await;

        assert_eq!(written, Ok(false));
        assert_eq!(store.read(&key).unwrap(), "other");
    }

    #[tokio::test]
    async fn guarded_update_writes_all_or_nothing() {
        let store = store();
        let conn = store.connection();
        let guard = path("ns/rooms/A");

        let claimed = conn
            .compare_and_update(
                &guard,
                0,
                vec![
                    (guard.clone(), Some(Bytes::from_static(b"meta"))),
                    (path("ns/rooms/A/members/p"), Some(Bytes::from_static(b"m"))),
                ],
            )
            .await;
        assert_eq!(claimed, Ok(true));

        let again = conn
            .compare_and_update(
                &guard,
                0,
                vec![
                    (guard.clone(), Some(Bytes::from_static(b"other"))),
                    (path("ns/rooms/A/members/q"), Some(Bytes::from_static(b"n"))),
                ],
            )
            .await;
        assert_eq!(again, Ok(false));
        assert_eq!(
            store.keys_under(&guard),
            vec!["ns/rooms/A".to_string(), "ns/rooms/A/members/p".to_string()]
        );
        assert_eq!(store.read(&guard).unwrap(), "meta");
    }

    #[tokio::test]
    async fn removed_paths_release_their_disconnect_hooks() {
        let store = store();
        let conn = store.connection();

        for n in 0..20 {
            let signal = path(&format!("ns/rooms/A/signals/s{n}"));
            conn.set(&signal, Bytes::from_static(b"sig")).await.unwrap();
            conn.on_disconnect_remove(&signal).await.unwrap();
            conn.remove(&signal).await.unwrap();
        }
        assert_eq!(store.disconnect_hook_count(), 0);

        let member = path("ns/rooms/A/members/p");
        conn.set(&member, Bytes::from_static(b"m")).await.unwrap();
        conn.on_disconnect_remove(&member).await.unwrap();
        conn.remove(&path("ns/rooms/A")).await.unwrap();
        assert_eq!(store.disconnect_hook_count(), 0);
    }
}
