//! Room lifecycle: create, join, leave, lockout, expiry and destruction.
//!
//! ```text
//! ABSENT ──create──► ACTIVE ──threshold──► LOCKED
//!                      │                     │
//!                      └──expiry / empty / burn──► DESTROYED
//! ```
//!
//! `DESTROYED` and `ABSENT` look the same to every caller. Nothing leaves
//! `LOCKED` except destruction.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use blackkeep_core::{Environment, PeerId, RendezvousConfig, RoomCode};
use blackkeep_crypto::import_public_key;
use blackkeep_store::{Store, StoreError, Subscription, TxDecision, TxOutcome, cbor};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{
    error::RendezvousError,
    records::{MemberRecord, PeerInfo, RoomMeta, RoomPaths, RoomRecord},
};

/// Codes tried by `create` before giving up on collisions.
pub const MAX_CODE_ATTEMPTS: u32 = 8;

/// Successful join: room metadata and the members already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room metadata at join time
    pub room: RoomMeta,
    /// Other members, excluding the joiner
    pub peers: Vec<PeerInfo>,
}

/// Counter state after a committed failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Failed attempts including this one
    pub failed_attempts: u32,
    /// Room is locked
    pub locked: bool,
    /// This call flipped the lock; true for exactly one call per room
    pub newly_locked: bool,
}

/// Transition reported by [`RoomLifecycle::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// Room crossed the failed-attempt threshold
    Locked,
    /// Room is gone (expired, emptied or burned)
    Destroyed,
}

/// Handle for a [`RoomLifecycle::watch`] subscription.
///
/// Dropping the handle stops the watch.
#[derive(Debug)]
pub struct RoomWatch {
    task: Option<JoinHandle<()>>,
}

impl RoomWatch {
    /// Stop watching. Idempotent.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True after [`RoomWatch::close`].
    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for RoomWatch {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pending expiry check for one room.
struct ExpiryTimer {
    id: u64,
    task: JoinHandle<()>,
}

/// Room operations for one peer's store connection.
///
/// Clones share the expiry timers. Every method is safe to call
/// concurrently from several peers; only [`RoomLifecycle::record_failed_attempt`]
/// needs cross-peer atomicity and it runs as a store transaction.
pub struct RoomLifecycle<S: Store, E: Environment> {
    store: S,
    env: E,
    config: Arc<RendezvousConfig>,
    paths: RoomPaths,
    display_name: Arc<str>,
    expiry_timers: Arc<Mutex<HashMap<RoomCode, ExpiryTimer>>>,
    next_timer_id: Arc<AtomicU64>,
}

impl<S: Store, E: Environment> Clone for RoomLifecycle<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            env: self.env.clone(),
            config: Arc::clone(&self.config),
            paths: self.paths.clone(),
            display_name: Arc::clone(&self.display_name),
            expiry_timers: Arc::clone(&self.expiry_timers),
            next_timer_id: Arc::clone(&self.next_timer_id),
        }
    }
}

impl<S: Store, E: Environment> RoomLifecycle<S, E> {
    /// Bind to a store connection.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: `config` fails validation
    pub fn new(store: S, env: E, config: RendezvousConfig) -> Result<Self, RendezvousError> {
        config.validate()?;
        let paths = RoomPaths::new(&config.namespace)?;

        Ok(Self {
            store,
            env,
            config: Arc::new(config),
            paths,
            display_name: Arc::from(""),
            expiry_timers: Arc::new(Mutex::new(HashMap::new())),
            next_timer_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Name written into member entries this handle creates.
    #[must_use]
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Arc::from(name);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    /// Create a room with `peer_id` as its first member.
    ///
    /// The room record and the creator's member entry are committed together,
    /// guarded on the code being unused; on collision a new code is drawn.
    /// Either both land or neither does. The member entry is removed
    /// automatically if this connection drops, and a local expiry check runs
    /// shortly after the room's lifetime.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: malformed `peer_id`
    /// - `InvalidPeerKey`: `public_key` does not decode
    /// - `RoomCodeExhausted`: every drawn code was taken
    /// - `Store`: store failure
    pub async fn create(
        &self,
        peer_id: &str,
        public_key: &str,
    ) -> Result<RoomCode, RendezvousError> {
        let peer = PeerId::parse(peer_id)?;
        import_public_key(public_key)?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = RoomCode::generate(&self.env);
            let now = self.store.server_time();
            let record = RoomRecord::new(now, self.config.room_ttl_millis(), &self.env);
            let member = self.member_record(public_key, now);

            if !self.claim(&code, &peer, &record, &member).await? {
                debug!(attempt, "room code collision, drawing another");
                continue;
            }
            self.schedule_expiry(&code, record.expires_at);

            info!(room = %code, peer = %peer, "room created");
            return Ok(code);
        }

        Err(RendezvousError::RoomCodeExhausted { attempts: MAX_CODE_ATTEMPTS })
    }

    /// Join an existing room.
    ///
    /// An expired room is destroyed on the spot and reported exactly like a
    /// missing one. The member entry is written only if the room record is
    /// unchanged since it was checked, so a join never lands in a room that
    /// was locked or destroyed in the meantime.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: malformed code or peer id
    /// - `InvalidPeerKey`: `public_key` does not decode
    /// - `RoomNotFound`: no such room, or it has expired
    /// - `RoomLocked`: room is locked
    /// - `Store`: store failure
    pub async fn join(
        &self,
        room_code: &str,
        peer_id: &str,
        public_key: &str,
    ) -> Result<JoinOutcome, RendezvousError> {
        let code = RoomCode::parse(room_code)?;
        let peer = PeerId::parse(peer_id)?;
        import_public_key(public_key)?;

        let room_path = self.paths.room(&code);
        let member_path = self.paths.member(&code, &peer);
        let budget = self.store.retry_budget().max(1);
        let mut hooked = false;

        for attempt in 1..=budget {
            let current = self.store.get_versioned(&room_path).await?;
            let Some(bytes) = current.value.as_deref() else {
                return Err(RendezvousError::RoomNotFound);
            };
            let record: RoomRecord = cbor::decode(bytes)?;
            if record.locked {
                debug!(room = %code, "join refused, room locked");
                return Err(RendezvousError::RoomLocked);
            }

            let now = self.store.server_time();
            if record.is_expired(now) {
                debug!(room = %code, "join found expired room, destroying");
                if let Err(err) = self.burn(&code).await {
                    warn!(room = %code, error = %err, "burn of expired room failed");
                }
                return Err(RendezvousError::RoomNotFound);
            }

            let peers: Vec<PeerInfo> =
                self.members(&code).await?.into_iter().filter(|p| p.peer_id != peer).collect();

            // Registered before the commit so nothing can fail after it
            if !hooked {
                self.store.on_disconnect_remove(&member_path).await?;
                hooked = true;
            }

            let member = cbor::encode(&self.member_record(public_key, now))?;
            let writes = vec![(member_path.clone(), Some(member))];
            if self.store.compare_and_update(&room_path, current.version, writes).await? {
                self.schedule_expiry(&code, record.expires_at);
                info!(room = %code, peer = %peer, "joined room");
                return Ok(JoinOutcome { room: RoomMeta::from_record(code, &record), peers });
            }
            debug!(room = %code, attempt, "room changed during join, retrying");
        }

        Err(StoreError::TransactionConflict { path: room_path.to_string(), attempts: budget }.into())
    }

    /// Remove a member; destroy the room if it is now empty.
    ///
    /// Best effort: failures are logged and swallowed so shutdown never
    /// blocks on the store.
    pub async fn leave(&self, code: &RoomCode, peer: &PeerId) {
        if let Err(err) = self.try_leave(code, peer).await {
            warn!(room = %code, peer = %peer, error = %err, "leave failed");
        }
    }

    async fn try_leave(&self, code: &RoomCode, peer: &PeerId) -> Result<(), RendezvousError> {
        self.store.remove(&self.paths.member(code, peer)).await?;

        if self.store.children(&self.paths.members(code)).await?.is_empty() {
            debug!(room = %code, "last member left");
            self.burn(code).await?;
        }
        Ok(())
    }

    /// Delete the room, its members and its signals.
    ///
    /// Idempotent; also cancels this handle's pending expiry check.
    ///
    /// # Errors
    ///
    /// - `Store`: store failure (safe to retry)
    pub async fn burn(&self, code: &RoomCode) -> Result<(), RendezvousError> {
        if let Some(timer) = self.timers().remove(code) {
            timer.task.abort();
        }
        self.store.remove(&self.paths.room(code)).await?;
        info!(room = %code, "room destroyed");
        Ok(())
    }

    /// Count one failed attempt; lock at the configured threshold.
    ///
    /// Runs as a store transaction, so concurrent calls from many peers each
    /// commit exactly once and the lock flips exactly once.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound`: room is gone
    /// - `Store`: store failure, including an exhausted conflict budget
    pub async fn record_failed_attempt(
        &self,
        code: &RoomCode,
    ) -> Result<LockoutStatus, RendezvousError> {
        let threshold = self.config.lockout_threshold;
        let mut observed: Option<LockoutStatus> = None;
        let mut corrupt: Option<StoreError> = None;

        let outcome = self
            .store
            .transaction(&self.paths.room(code), |current| {
                let Some(bytes) = current else {
                    return TxDecision::Abort;
                };
                let mut record: RoomRecord = match cbor::decode(bytes) {
                    Ok(record) => record,
                    Err(err) => {
                        corrupt = Some(err);
                        return TxDecision::Abort;
                    },
                };

                let was_locked = record.locked;
                record.failed_attempts = record.failed_attempts.saturating_add(1);
                if record.failed_attempts >= threshold {
                    record.locked = true;
                }
                observed = Some(LockoutStatus {
                    failed_attempts: record.failed_attempts,
                    locked: record.locked,
                    newly_locked: record.locked && !was_locked,
                });

                match cbor::encode(&record) {
                    Ok(encoded) => TxDecision::Set(encoded),
                    Err(err) => {
                        corrupt = Some(err);
                        TxDecision::Abort
                    },
                }
            })
            .await?;

        if let Some(err) = corrupt {
            return Err(err.into());
        }

        match (outcome, observed) {
            (TxOutcome::Committed { .. }, Some(status)) => {
                if status.newly_locked {
                    warn!(room = %code, attempts = status.failed_attempts, "room locked");
                } else {
                    debug!(room = %code, attempts = status.failed_attempts, "failed attempt recorded");
                }
                Ok(status)
            },
            _ => Err(RendezvousError::RoomNotFound),
        }
    }

    /// Destroy the room if it has expired.
    ///
    /// No-op when the room is gone or still live. Returns whether this call
    /// destroyed it. Best effort: failures are logged and reported as `false`.
    pub async fn expire(&self, code: &RoomCode) -> bool {
        match self.try_expire(code).await {
            Ok(destroyed) => destroyed,
            Err(err) => {
                warn!(room = %code, error = %err, "expiry check failed");
                false
            },
        }
    }

    async fn try_expire(&self, code: &RoomCode) -> Result<bool, RendezvousError> {
        let Some(record) = self.load(code).await? else {
            return Ok(false);
        };
        if !record.is_expired(self.store.server_time()) {
            return Ok(false);
        }

        debug!(room = %code, "room expired");
        self.burn(code).await?;
        Ok(true)
    }

    /// Current metadata of a live room.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound`: missing or expired
    /// - `Store`: store failure
    pub async fn room(&self, code: &RoomCode) -> Result<RoomMeta, RendezvousError> {
        match self.load(code).await? {
            Some(record) if !record.is_expired(self.store.server_time()) => {
                Ok(RoomMeta::from_record(code.clone(), &record))
            },
            _ => Err(RendezvousError::RoomNotFound),
        }
    }

    /// Every current member, in peer id order.
    ///
    /// # Errors
    ///
    /// - `Store`: store failure or a corrupt member entry
    pub async fn members(&self, code: &RoomCode) -> Result<Vec<PeerInfo>, RendezvousError> {
        let children = self.store.children(&self.paths.members(code)).await?;

        children
            .into_iter()
            .map(|(key, value)| -> Result<PeerInfo, RendezvousError> {
                let peer_id = PeerId::parse(&key)?;
                let member: MemberRecord = cbor::decode(&value)?;
                Ok(PeerInfo {
                    peer_id,
                    public_key: member.public_key,
                    display_name: member.display_name,
                    joined_at: member.joined_at,
                })
            })
            .collect()
    }

    /// Public key a member registered, if the member is present.
    ///
    /// # Errors
    ///
    /// - `Store`: store failure or a corrupt member entry
    pub async fn peer_public_key(
        &self,
        code: &RoomCode,
        peer: &PeerId,
    ) -> Result<Option<String>, RendezvousError> {
        let Some(bytes) = self.store.get(&self.paths.member(code, peer)).await? else {
            return Ok(None);
        };
        let member: MemberRecord = cbor::decode(&bytes)?;
        Ok(Some(member.public_key))
    }

    /// Report lock and destruction of a room to `on_event`.
    ///
    /// `Locked` fires at most once; `Destroyed` fires once and ends the watch.
    /// A room that is already gone reports `Destroyed` immediately.
    ///
    /// # Errors
    ///
    /// - `Store`: subscription could not be opened
    pub async fn watch<F>(&self, code: &RoomCode, mut on_event: F) -> Result<RoomWatch, RendezvousError>
    where
        F: FnMut(RoomEvent) + Send + 'static,
    {
        let mut subscription = self.store.subscribe_value(&self.paths.room(code)).await?;
        let code = code.clone();

        let task = tokio::spawn(async move {
            let mut reported_lock = false;
            while let Some(value) = subscription.next().await {
                let Some(bytes) = value else {
                    on_event(RoomEvent::Destroyed);
                    break;
                };
                match cbor::decode::<RoomRecord>(&bytes) {
                    Ok(record) if record.locked && !reported_lock => {
                        reported_lock = true;
                        on_event(RoomEvent::Locked);
                    },
                    Ok(_) => {},
                    Err(err) => warn!(room = %code, error = %err, "unreadable room record"),
                }
            }
        });

        Ok(RoomWatch { task: Some(task) })
    }

    /// Abort every pending expiry check owned by this handle.
    pub fn cancel_timers(&self) {
        for (_, timer) in self.timers().drain() {
            timer.task.abort();
        }
    }

    /// Number of pending expiry checks.
    ///
    /// A check is dropped as soon as its room disappears, whoever removed it.
    pub fn pending_timers(&self) -> usize {
        self.timers().len()
    }

    async fn load(&self, code: &RoomCode) -> Result<Option<RoomRecord>, RendezvousError> {
        let Some(bytes) = self.store.get(&self.paths.room(code)).await? else {
            return Ok(None);
        };
        Ok(Some(cbor::decode(&bytes)?))
    }

    fn member_record(&self, public_key: &str, joined_at: u64) -> MemberRecord {
        MemberRecord {
            public_key: public_key.to_string(),
            display_name: self.display_name.to_string(),
            joined_at,
        }
    }

    /// Write a new room record and its first member in one commit.
    ///
    /// Returns `false` if `code` is already taken.
    async fn claim(
        &self,
        code: &RoomCode,
        peer: &PeerId,
        record: &RoomRecord,
        member: &MemberRecord,
    ) -> Result<bool, RendezvousError> {
        let room_path = self.paths.room(code);
        let member_path = self.paths.member(code, peer);
        let room_bytes = cbor::encode(record)?;
        let member_bytes = cbor::encode(member)?;
        let budget = self.store.retry_budget().max(1);
        let mut hooked = false;

        for attempt in 1..=budget {
            let current = self.store.get_versioned(&room_path).await?;
            if current.value.is_some() {
                return Ok(false);
            }

            // Registered before the commit so nothing can fail after it
            if !hooked {
                self.store.on_disconnect_remove(&member_path).await?;
                hooked = true;
            }

            let writes = vec![
                (room_path.clone(), Some(room_bytes.clone())),
                (member_path.clone(), Some(member_bytes.clone())),
            ];
            if self.store.compare_and_update(&room_path, current.version, writes).await? {
                return Ok(true);
            }
            trace!(room = %code, attempt, "room claim conflict, retrying");
        }

        Err(StoreError::TransactionConflict { path: room_path.to_string(), attempts: budget }.into())
    }

    /// Expire the room shortly after `expires_at`, unless it disappears first.
    fn schedule_expiry(&self, code: &RoomCode, expires_at: u64) {
        let remaining = expires_at.saturating_sub(self.store.server_time());
        let delay = Duration::from_millis(remaining) + self.config.expiry_grace;
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);

        let this = self.clone();
        let task_code = code.clone();

        // Held across the spawn so the task cannot release its entry before
        // the entry exists
        let mut timers = self.timers();
        let task = tokio::spawn(async move {
            let watch = this.store.subscribe_value(&this.paths.room(&task_code)).await;
            if let Err(err) = &watch {
                debug!(room = %task_code, error = %err, "expiry check runs without a room watch");
            }

            tokio::select! {
                () = this.env.sleep(delay) => {
                    // Detach before expiring so burn does not abort this task
                    this.release_timer(&task_code, id);
                    this.expire(&task_code).await;
                },
                () = value_removed(watch.ok()) => {
                    this.release_timer(&task_code, id);
                    debug!(room = %task_code, "room gone, expiry check dropped");
                },
            }
        });

        if let Some(previous) = timers.insert(code.clone(), ExpiryTimer { id, task }) {
            previous.task.abort();
        }
    }

    fn release_timer(&self, code: &RoomCode, id: u64) {
        let mut timers = self.timers();
        if timers.get(code).is_some_and(|timer| timer.id == id) {
            timers.remove(code);
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<RoomCode, ExpiryTimer>> {
        self.expiry_timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once the watched value is removed; never without a watch.
async fn value_removed<T>(watch: Option<Subscription<Option<T>>>) {
    if let Some(mut watch) = watch {
        while let Some(value) = watch.next().await {
            if value.is_none() {
                return;
            }
        }
    }
    std::future::pending::<()>().await;
}
