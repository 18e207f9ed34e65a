//! In-process two-peer rendezvous.
//!
//! Alice creates a room, Bob joins with the code, both run the handshake over
//! the signal relay, then they trade encrypted messages, with Alice advancing
//! the ratchet every few messages. Everything runs against one
//! [`MemoryStore`] with a separate connection per peer.

use std::{path::PathBuf, time::Duration};

use blackkeep_core::{Environment, PeerId, RendezvousConfig};
use blackkeep_crypto::{KeyExchangeContext, KeyPair, export_public_key};
use blackkeep_rendezvous::{
    RendezvousError, RoomLifecycle, SecureSession, SignalChannel, SignalInbox, SignalMessage,
    SignalRelay, SystemEnv, establish_session,
};
use blackkeep_store::{MemoryConnection, MemoryStore, Store};
use clap::Args;
use tracing::{debug, info};

use crate::error::CliError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for `blackkeep demo`.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Messages to exchange, alternating sender
    #[arg(long, default_value = "6")]
    messages: u32,

    /// Advance the ratchet after this many messages (0 disables)
    #[arg(long, default_value = "2")]
    ratchet_every: u32,

    /// Room lifetime in seconds (overrides the config file)
    #[arg(long)]
    room_ttl: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

type Conn = MemoryConnection<SystemEnv>;

struct Peer {
    name: &'static str,
    id: PeerId,
    connection: Conn,
    rooms: RoomLifecycle<Conn, SystemEnv>,
    relay: SignalRelay<Conn, SystemEnv>,
}

impl Peer {
    fn new(
        name: &'static str,
        store: &MemoryStore<SystemEnv>,
        env: SystemEnv,
        config: &RendezvousConfig,
    ) -> Result<Self, RendezvousError> {
        let connection = store.connection();
        let rooms = RoomLifecycle::new(connection.clone(), env, config.clone())?
            .with_display_name(name);
        let relay = SignalRelay::new(connection.clone(), env, config.clone())?;
        Ok(Self { name, id: PeerId::generate(&env), connection, rooms, relay })
    }
}

/// Run the demo end to end.
pub async fn run(args: DemoArgs) -> Result<(), CliError> {
    let config = load_config(&args)?;
    let env = SystemEnv::new();
    let store = MemoryStore::new(env).with_retry_budget(config.max_transaction_retries);

    let alice = Peer::new("alice", &store, env, &config)?;
    let bob = Peer::new("bob", &store, env, &config)?;

    let alice_pair = KeyPair::generate(&env);
    let code = alice.rooms.create(alice.id.as_str(), &export_public_key(&alice_pair)).await?;
    let alice_ctx = KeyExchangeContext::with_key_pair(alice_pair, code.as_str());
    info!(room = %code, peer = alice.name, ttl = ?config.room_ttl, "room created");

    let bob_ctx = KeyExchangeContext::new(code.as_str(), &env);
    let joined = bob.rooms.join(code.as_str(), bob.id.as_str(), bob_ctx.public_key()).await?;
    let Some(host) = joined.peers.first() else {
        return Err(CliError::Mismatch("joined an empty room".to_string()));
    };
    info!(room = %code, peer = bob.name, host = %host.display_name, "joined room");

    let alice_channel = SignalChannel::new(alice.relay.clone(), code.clone(), alice.id.clone());
    let bob_channel = SignalChannel::new(bob.relay.clone(), code.clone(), bob.id.clone());
    let mut alice_inbox = alice_channel.inbox().await?;
    let mut bob_inbox = bob_channel.inbox().await?;

    let (alice_session, bob_session) = tokio::join!(
        establish_session(&alice_channel, &alice_ctx, &mut alice_inbox, None, HANDSHAKE_TIMEOUT),
        establish_session(&bob_channel, &bob_ctx, &mut bob_inbox, Some(host), HANDSHAKE_TIMEOUT),
    );
    let mut alice_session = alice_session?;
    let mut bob_session = bob_session?;

    if alice_session.fingerprint() != bob_session.fingerprint() {
        return Err(CliError::Mismatch("session fingerprints differ".to_string()));
    }
    info!(fingerprint = alice_session.fingerprint(), "fingerprints match");

    for n in 1..=args.messages {
        let (sender, receiver, from) = if n % 2 == 1 {
            (&alice_session, &bob_session, alice.name)
        } else {
            (&bob_session, &alice_session, bob.name)
        };
        exchange(sender, receiver, from, n)?;

        if args.ratchet_every > 0 && n % args.ratchet_every == 0 {
            let rekey = alice_session.rekey()?;
            alice_channel.send(bob_session.local(), &rekey).await?;
            apply_next_rekey(&bob_channel, &mut bob_inbox, &mut bob_session).await?;
            info!(generation = alice_session.generation(), "ratchet advanced");
        }
    }

    alice_channel.send(bob_session.local(), &SignalMessage::Bye).await?;
    alice_inbox.close();
    bob_inbox.close();

    bob.rooms.leave(&code, &bob.id).await;
    alice.rooms.leave(&code, &alice.id).await;
    let destroyed = matches!(alice.rooms.room(&code).await, Err(RendezvousError::RoomNotFound));
    info!(room = %code, destroyed, "both peers left");

    for peer in [&alice, &bob] {
        peer.rooms.cancel_timers();
        peer.relay.cancel_timers();
        peer.connection.disconnect();
    }
    debug!(entries = store.entry_count(), at = env.wall_clock_millis(), "store drained");
    Ok(())
}

fn exchange(
    sender: &SecureSession<SystemEnv>,
    receiver: &SecureSession<SystemEnv>,
    from: &str,
    n: u32,
) -> Result<(), CliError> {
    let plaintext = format!("message {n} from {from}");
    let sealed = sender.encrypt(&plaintext);
    let opened = receiver.decrypt(&sealed)?;

    if opened != plaintext {
        return Err(CliError::Mismatch(format!("message {n} changed in transit")));
    }
    info!(n, from, plaintext_len = plaintext.len(), sealed_len = sealed.len(), "message delivered");
    Ok(())
}

async fn apply_next_rekey<S: Store>(
    channel: &SignalChannel<S, SystemEnv>,
    inbox: &mut SignalInbox,
    session: &mut SecureSession<SystemEnv>,
) -> Result<(), CliError> {
    let Some(signal) = inbox.recv().await else {
        return Err(CliError::Mismatch("relay closed before rekey arrived".to_string()));
    };
    session.apply_rekey(&channel.open(&signal)?)?;
    Ok(())
}

fn load_config(args: &DemoArgs) -> Result<RendezvousConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| CliError::Config { path: path.clone(), reason: e.to_string() })?;
            serde_json::from_str(&raw)
                .map_err(|e| CliError::Config { path: path.clone(), reason: e.to_string() })?
        },
        None => RendezvousConfig::default(),
    };

    if let Some(secs) = args.room_ttl {
        config.room_ttl = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}
