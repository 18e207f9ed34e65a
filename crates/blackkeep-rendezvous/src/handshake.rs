//! Pairwise handshake over the signal relay, and the session it produces.
//!
//! Roles follow peer id order ([`Role::for_pair`]): the smaller id is the
//! Initiator and owns the derivation salt.
//!
//! ```text
//! joiner is Initiator            joiner is Responder
//!
//! J ──KeyOffer{pk, salt}──► C    J ──Hello{pk}──────────► C
//! J ◄──KeyAccept{pk}─────── C    J ◄──KeyOffer{pk, salt}── C
//!                                J ──KeyAccept{pk}───────► C
//! ```
//!
//! Every message is CBOR, sealed under the room's signal key, so the relay
//! never sees key material in the clear.

use std::time::Duration;

use blackkeep_core::{Environment, PeerId, RoomCode};
use blackkeep_crypto::{
    KeyExchangeContext, Role, SALT_SIZE, SessionKeySet, SignalKey, advance, advance_with_salt,
    decrypt_message, decrypt_signal, derive_signal_key, encrypt_message, encrypt_signal,
    session_fingerprint,
};
use blackkeep_store::Store;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{
    error::RendezvousError,
    records::PeerInfo,
    relay::{ReceivedSignal, SignalInbox, SignalRelay},
};

/// Control message carried by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalMessage {
    /// A joiner announces itself to a member that will initiate
    Hello {
        /// Sender's exported public key
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    /// Initiator's key and derivation salt
    KeyOffer {
        /// Sender's exported public key
        #[serde(rename = "publicKey")]
        public_key: String,
        /// Salt the session keys were derived under
        salt: [u8; SALT_SIZE],
    },
    /// Responder has derived the same keys
    KeyAccept {
        /// Sender's exported public key
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    /// Sender advanced its ratchet; apply the same step
    Rekey {
        /// Salt of the new generation
        salt: [u8; SALT_SIZE],
        /// Generation after the step
        generation: u32,
    },
    /// Sender is leaving
    Bye,
}

/// Encrypted relay endpoint for one peer in one room.
pub struct SignalChannel<S: Store, E: Environment> {
    relay: SignalRelay<S, E>,
    room: RoomCode,
    local: PeerId,
    key: SignalKey,
}

impl<S: Store, E: Environment> SignalChannel<S, E> {
    /// Channel for `local` in `room`, keyed from the room code.
    pub fn new(relay: SignalRelay<S, E>, room: RoomCode, local: PeerId) -> Self {
        let key = derive_signal_key(room.as_str());
        Self { relay, room, local, key }
    }

    /// Room this channel talks in.
    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    /// Local peer id.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Inbox of signals addressed to the local peer.
    ///
    /// # Errors
    ///
    /// - `Store`: subscription could not be opened
    pub async fn inbox(&self) -> Result<SignalInbox, RendezvousError> {
        self.relay.inbox(&self.room, &self.local).await
    }

    /// Seal and relay `message` to `to`; returns the signal id.
    ///
    /// # Errors
    ///
    /// - `Serialization`: message could not be encoded
    /// - `Store`: relay append failed
    pub async fn send(&self, to: &PeerId, message: &SignalMessage) -> Result<String, RendezvousError> {
        let mut encoded = Vec::new();
        ciborium::into_writer(message, &mut encoded)
            .map_err(|e| RendezvousError::Serialization(format!("signal encode: {e}")))?;

        let payload = encrypt_signal(&encoded, &self.key, self.relay.env());
        self.relay.send(&self.room, &self.local, to, &payload).await
    }

    /// Authenticate and decode a delivered signal.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed`: payload was not sealed under this room's key
    /// - `Serialization`: authenticated payload is not a known message
    pub fn open(&self, signal: &ReceivedSignal) -> Result<SignalMessage, RendezvousError> {
        let plaintext = decrypt_signal(&signal.payload, &self.key)?;
        ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| RendezvousError::Serialization(format!("signal decode: {e}")))
    }

    fn padding_block(&self) -> usize {
        self.relay.config().padding_block
    }

    fn env(&self) -> &E {
        self.relay.env()
    }
}

/// Run the handshake with one peer and return the live session.
///
/// `known_peer` is the member a joiner found in the room; a creator passes
/// `None` and answers whoever contacts it first. A signal that fails to
/// authenticate aborts the handshake rather than being skipped.
///
/// # Errors
///
/// - `Handshake`: timeout, closed inbox, unexpected message or role mismatch
/// - `DecryptionFailed`: a signal was not sealed under the room key
/// - `InvalidPeerKey`: the peer's public key is unusable
/// - `Store`: relay failure
pub async fn establish_session<S: Store, E: Environment>(
    channel: &SignalChannel<S, E>,
    context: &KeyExchangeContext,
    inbox: &mut SignalInbox,
    known_peer: Option<&PeerInfo>,
    timeout: Duration,
) -> Result<SecureSession<E>, RendezvousError> {
    let exchange = async {
        match known_peer {
            Some(peer) => join_handshake(channel, context, inbox, peer).await,
            None => answer_handshake(channel, context, inbox).await,
        }
    };

    tokio::select! {
        result = exchange => {
            let (remote, remote_public_key, role, keys) = result?;
            let session = SecureSession::new(channel, context, remote, remote_public_key, role, keys);
            info!(room = %channel.room, remote = %session.remote, role = ?role, "session established");
            Ok(session)
        },
        () = channel.env().sleep(timeout) => {
            Err(RendezvousError::Handshake(format!("no response within {timeout:?}")))
        },
    }
}

type Negotiated = (PeerId, String, Role, SessionKeySet);

async fn join_handshake<S: Store, E: Environment>(
    channel: &SignalChannel<S, E>,
    context: &KeyExchangeContext,
    inbox: &mut SignalInbox,
    peer: &PeerInfo,
) -> Result<Negotiated, RendezvousError> {
    let own_key = context.public_key().to_string();
    let role = Role::for_pair(channel.local.as_str(), peer.peer_id.as_str());

    match role {
        Role::Initiator => {
            let keys = context.initiate(&peer.public_key, channel.env())?;
            let offer = SignalMessage::KeyOffer { public_key: own_key, salt: *keys.salt() };
            channel.send(&peer.peer_id, &offer).await?;
            debug!(remote = %peer.peer_id, "key offer sent");

            let (_, reply) = next_from(channel, inbox, Some(&peer.peer_id)).await?;
            let SignalMessage::KeyAccept { public_key } = reply else {
                return Err(unexpected("KeyAccept", &reply));
            };
            ensure_same_key(&peer.public_key, &public_key)?;
            Ok((peer.peer_id.clone(), public_key, role, keys))
        },
        Role::Responder => {
            channel.send(&peer.peer_id, &SignalMessage::Hello { public_key: own_key.clone() }).await?;
            debug!(remote = %peer.peer_id, "hello sent");

            let (_, reply) = next_from(channel, inbox, Some(&peer.peer_id)).await?;
            let SignalMessage::KeyOffer { public_key, salt } = reply else {
                return Err(unexpected("KeyOffer", &reply));
            };
            ensure_same_key(&peer.public_key, &public_key)?;

            let keys = context.respond(&public_key, salt)?;
            channel.send(&peer.peer_id, &SignalMessage::KeyAccept { public_key: own_key }).await?;
            Ok((peer.peer_id.clone(), public_key, role, keys))
        },
    }
}

async fn answer_handshake<S: Store, E: Environment>(
    channel: &SignalChannel<S, E>,
    context: &KeyExchangeContext,
    inbox: &mut SignalInbox,
) -> Result<Negotiated, RendezvousError> {
    let own_key = context.public_key().to_string();
    let (remote, first) = next_from(channel, inbox, None).await?;
    let role = Role::for_pair(channel.local.as_str(), remote.as_str());

    match (first, role) {
        (SignalMessage::Hello { public_key }, Role::Initiator) => {
            let keys = context.initiate(&public_key, channel.env())?;
            let offer = SignalMessage::KeyOffer { public_key: own_key, salt: *keys.salt() };
            channel.send(&remote, &offer).await?;
            debug!(remote = %remote, "key offer sent");

            let (_, reply) = next_from(channel, inbox, Some(&remote)).await?;
            let SignalMessage::KeyAccept { public_key: accepted } = reply else {
                return Err(unexpected("KeyAccept", &reply));
            };
            ensure_same_key(&public_key, &accepted)?;
            Ok((remote, public_key, role, keys))
        },
        (SignalMessage::KeyOffer { public_key, salt }, Role::Responder) => {
            let keys = context.respond(&public_key, salt)?;
            channel.send(&remote, &SignalMessage::KeyAccept { public_key: own_key }).await?;
            Ok((remote, public_key, role, keys))
        },
        (SignalMessage::Hello { .. } | SignalMessage::KeyOffer { .. }, role) => {
            Err(RendezvousError::Handshake(format!("peer {remote} disagrees on roles (local is {role:?})")))
        },
        (other, _) => Err(unexpected("Hello or KeyOffer", &other)),
    }
}

/// Next message, optionally only from `from`. Signals from other peers are
/// consumed and dropped.
async fn next_from<S: Store, E: Environment>(
    channel: &SignalChannel<S, E>,
    inbox: &mut SignalInbox,
    from: Option<&PeerId>,
) -> Result<(PeerId, SignalMessage), RendezvousError> {
    loop {
        let Some(signal) = inbox.recv().await else {
            return Err(RendezvousError::Handshake("signal inbox closed".to_string()));
        };
        if from.is_some_and(|expected| *expected != signal.from) {
            trace!(from = %signal.from, "ignoring signal from another peer");
            continue;
        }

        let message = channel.open(&signal)?;
        if message == SignalMessage::Bye {
            return Err(RendezvousError::Handshake(format!("peer {} left", signal.from)));
        }
        return Ok((signal.from, message));
    }
}

fn ensure_same_key(expected: &str, presented: &str) -> Result<(), RendezvousError> {
    if expected == presented {
        Ok(())
    } else {
        Err(RendezvousError::Handshake("peer presented a different public key".to_string()))
    }
}

fn unexpected(wanted: &str, got: &SignalMessage) -> RendezvousError {
    let got = match got {
        SignalMessage::Hello { .. } => "Hello",
        SignalMessage::KeyOffer { .. } => "KeyOffer",
        SignalMessage::KeyAccept { .. } => "KeyAccept",
        SignalMessage::Rekey { .. } => "Rekey",
        SignalMessage::Bye => "Bye",
    };
    RendezvousError::Handshake(format!("expected {wanted}, got {got}"))
}

/// Established pairwise session: encrypts, decrypts and ratchets.
pub struct SecureSession<E: Environment> {
    local: PeerId,
    remote: PeerId,
    role: Role,
    keys: SessionKeySet,
    fingerprint: String,
    padding_block: usize,
    env: E,
}

impl<E: Environment> SecureSession<E> {
    fn new<S: Store>(
        channel: &SignalChannel<S, E>,
        context: &KeyExchangeContext,
        remote: PeerId,
        remote_public_key: String,
        role: Role,
        keys: SessionKeySet,
    ) -> Self {
        Self {
            local: channel.local.clone(),
            remote,
            role,
            keys,
            fingerprint: session_fingerprint(context.public_key(), &remote_public_key),
            padding_block: channel.padding_block(),
            env: channel.env().clone(),
        }
    }

    /// Encrypt an application message for the remote peer.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let keys = self.keys.directional(self.role);
        encrypt_message(plaintext, keys.send, self.padding_block, &self.env)
    }

    /// Decrypt a message from the remote peer.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed`: tampered, truncated, or sealed under another
    ///   generation's key
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, RendezvousError> {
        let keys = self.keys.directional(self.role);
        Ok(decrypt_message(ciphertext, keys.receive)?)
    }

    /// Advance the ratchet locally; send the returned message to the peer.
    ///
    /// # Errors
    ///
    /// - `Handshake`: generation counter exhausted
    pub fn rekey(&mut self) -> Result<SignalMessage, RendezvousError> {
        self.keys = advance(&mut self.keys, &self.env)?;
        debug!(remote = %self.remote, generation = self.keys.generation(), "ratchet advanced");

        Ok(SignalMessage::Rekey { salt: *self.keys.salt(), generation: self.keys.generation() })
    }

    /// Apply the peer's ratchet step.
    ///
    /// # Errors
    ///
    /// - `Handshake`: not a `Rekey`, or not exactly one generation ahead
    pub fn apply_rekey(&mut self, message: &SignalMessage) -> Result<(), RendezvousError> {
        let SignalMessage::Rekey { salt, generation } = message else {
            return Err(unexpected("Rekey", message));
        };

        let expected = self.keys.generation().saturating_add(1);
        if *generation != expected {
            return Err(RendezvousError::Handshake(format!(
                "ratchet generation {generation}, expected {expected}"
            )));
        }

        self.keys = advance_with_salt(&mut self.keys, *salt, &self.env)?;
        debug!(remote = %self.remote, generation, "ratchet applied");
        Ok(())
    }

    /// Grouped-hex fingerprint over both public keys; equal on both sides.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Ratchet steps taken so far.
    pub fn generation(&self) -> u32 {
        self.keys.generation()
    }

    /// Local role in this pair.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local peer.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Remote peer.
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }
}

impl<E: Environment> std::fmt::Debug for SecureSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("generation", &self.keys.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_messages_survive_cbor() {
        let messages = [
            SignalMessage::Hello { public_key: "pk".to_string() },
            SignalMessage::KeyOffer { public_key: "pk".to_string(), salt: [7; SALT_SIZE] },
            SignalMessage::KeyAccept { public_key: "pk".to_string() },
            SignalMessage::Rekey { salt: [9; SALT_SIZE], generation: 3 },
            SignalMessage::Bye,
        ];

        for message in messages {
            let mut bytes = Vec::new();
            ciborium::into_writer(&message, &mut bytes).unwrap();
            let decoded: SignalMessage = ciborium::from_reader(bytes.as_slice()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn unexpected_names_the_message() {
        let err = unexpected("KeyAccept", &SignalMessage::Bye);
        assert_eq!(err, RendezvousError::Handshake("expected KeyAccept, got Bye".to_string()));
    }
}
