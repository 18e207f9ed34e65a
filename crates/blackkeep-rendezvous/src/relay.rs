//! Signal relay: at-most-once delivery of small encrypted messages between
//! room members through the store.
//!
//! Every signal is deleted on one of three paths, whichever comes first:
//! the recipient consumes it, the sender's connection drops, or the sender's
//! local TTL timer fires. Redelivery after a failed handshake is the sender's
//! job; the relay never retransmits.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use blackkeep_core::{Environment, PeerId, RendezvousConfig, RoomCode};
use blackkeep_store::{ChildAdded, Store, StorePath, cbor};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    error::RendezvousError,
    records::{RoomPaths, SignalRecord, decoy_field, random_padding},
};

/// A signal delivered to its recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSignal {
    /// Store-assigned id, time-ordered
    pub id: String,
    /// Sender
    pub from: PeerId,
    /// Recipient (the listening peer)
    pub to: PeerId,
    /// Signal-key ciphertext (base64)
    pub payload: String,
    /// Server time at send (ms)
    pub sent_at: u64,
}

/// Handle for a [`SignalRelay::listen`] subscription.
///
/// Dropping the handle stops delivery.
#[derive(Debug)]
pub struct SignalListener {
    task: Option<JoinHandle<()>>,
}

impl SignalListener {
    /// Stop delivery. Idempotent.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True after [`SignalListener::close`].
    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pull-style listener: delivered signals queue until read.
#[derive(Debug)]
pub struct SignalInbox {
    listener: SignalListener,
    rx: mpsc::UnboundedReceiver<ReceivedSignal>,
}

impl SignalInbox {
    /// Next delivered signal; `None` once closed.
    pub async fn recv(&mut self) -> Option<ReceivedSignal> {
        if self.listener.is_closed() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery and drop anything queued. Idempotent.
    pub fn close(&mut self) {
        self.listener.close();
        self.rx.close();
    }

    /// True after [`SignalInbox::close`].
    pub fn is_closed(&self) -> bool {
        self.listener.is_closed()
    }
}

/// Signal operations for one peer's store connection.
///
/// Clones share pending TTL timers.
pub struct SignalRelay<S: Store, E: Environment> {
    store: S,
    env: E,
    config: Arc<RendezvousConfig>,
    paths: RoomPaths,
    ttl_timers: Arc<Mutex<HashMap<StorePath, JoinHandle<()>>>>,
}

impl<S: Store, E: Environment> Clone for SignalRelay<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            env: self.env.clone(),
            config: Arc::clone(&self.config),
            paths: self.paths.clone(),
            ttl_timers: Arc::clone(&self.ttl_timers),
        }
    }
}

impl<S: Store, E: Environment> SignalRelay<S, E> {
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
            ttl_timers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    pub(crate) fn env(&self) -> &E {
        &self.env
    }

    /// Append a signal for `to`; returns its id.
    ///
    /// Registers removal on disconnect and a local TTL timer. Failing to
    /// register the disconnect hook is logged, not returned: the timer still
    /// bounds the signal's lifetime.
    ///
    /// # Errors
    ///
    /// - `Store`: the append itself failed
    pub async fn send(
        &self,
        code: &RoomCode,
        from: &PeerId,
        to: &PeerId,
        payload: &str,
    ) -> Result<String, RendezvousError> {
        let sent_at = self.store.server_time();
        let record = SignalRecord {
            from: from.clone(),
            to: to.clone(),
            payload: payload.to_string(),
            sent_at,
            expires_at: sent_at.saturating_add(self.config.signal_ttl_millis()),
            random_padding: random_padding(&self.env),
            decoy1: decoy_field(&self.env),
        };

        let path = self.store.push(&self.paths.signals(code), cbor::encode(&record)?).await?;
        if let Err(err) = self.store.on_disconnect_remove(&path).await {
            warn!(signal = %path, error = %err, "signal disconnect hook not registered");
        }
        self.schedule_removal(path.clone());

        trace!(room = %code, from = %from, to = %to, "signal sent");
        Ok(path.key().to_string())
    }

    /// Deliver signals addressed to `peer` to `on_signal`.
    ///
    /// Signals already in the room are replayed first. Expired signals are
    /// deleted without delivery; signals for other peers are left alone.
    /// Each delivered signal is deleted right after the callback returns.
    ///
    /// # Errors
    ///
    /// - `Store`: subscription could not be opened
    pub async fn listen<F>(
        &self,
        code: &RoomCode,
        peer: &PeerId,
        mut on_signal: F,
    ) -> Result<SignalListener, RendezvousError>
    where
        F: FnMut(ReceivedSignal) + Send + 'static,
    {
        let signals = self.paths.signals(code);
        let mut subscription = self.store.subscribe_child_added(&signals).await?;
        let store = self.store.clone();
        let peer = peer.clone();

        let task = tokio::spawn(async move {
            while let Some(ChildAdded { key, value }) = subscription.next().await {
                let path = signals.child(&key);
                let record: SignalRecord = match cbor::decode(&value) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(signal = %path, error = %err, "unreadable signal skipped");
                        continue;
                    },
                };

                if record.is_expired(store.server_time()) {
                    debug!(signal = %path, "dropping expired signal");
                    remove_best_effort(&store, &path).await;
                    continue;
                }
                if record.to != peer {
                    continue;
                }

                on_signal(ReceivedSignal {
                    id: key,
                    from: record.from,
                    to: record.to,
                    payload: record.payload,
                    sent_at: record.sent_at,
                });
                remove_best_effort(&store, &path).await;
            }
        });

        Ok(SignalListener { task: Some(task) })
    }

    /// [`SignalRelay::listen`] into a queue instead of a callback.
    ///
    /// # Errors
    ///
    /// - `Store`: subscription could not be opened
    pub async fn inbox(
        &self,
        code: &RoomCode,
        peer: &PeerId,
    ) -> Result<SignalInbox, RendezvousError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = self
            .listen(code, peer, move |signal| {
                // Receiver gone means the inbox was dropped
                let _ = tx.send(signal);
            })
            .await?;

        Ok(SignalInbox { listener, rx })
    }

    /// Abort every pending TTL timer owned by this handle.
    pub fn cancel_timers(&self) {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }
    }

    /// Number of signals still waiting on a TTL timer.
    pub fn pending_timers(&self) -> usize {
        self.timers().len()
    }

    fn schedule_removal(&self, path: StorePath) {
        let this = self.clone();
        let task_path = path.clone();
        let ttl = self.config.signal_ttl;

        let timer = tokio::spawn(async move {
            this.env.sleep(ttl).await;
            drop(this.timers().remove(&task_path));
            remove_best_effort(&this.store, &task_path).await;
            trace!(signal = %task_path, "signal ttl elapsed");
        });

        if let Some(previous) = self.timers().insert(path, timer) {
            previous.abort();
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<StorePath, JoinHandle<()>>> {
        self.ttl_timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn remove_best_effort<S: Store>(store: &S, path: &StorePath) {
    if let Err(err) = store.remove(path).await {
        warn!(signal = %path, error = %err, "signal removal failed");
    }
}
