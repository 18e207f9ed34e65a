//! Room lifecycle against the in-memory store with virtual time.
//!
//! Every test runs with a paused tokio clock, so TTLs and expiry timers
//! advance only when the test sleeps.

use std::time::Duration;

use blackkeep_core::{PeerId, RendezvousConfig, RoomCode};
use blackkeep_crypto::{KeyPair, export_public_key};
use blackkeep_harness::SimEnv;
use blackkeep_rendezvous::{RendezvousError, RoomEvent, RoomLifecycle};
use blackkeep_store::{MemoryConnection, MemoryStore, StorePath};
use tokio::sync::mpsc;

const ALICE: &str = "aaaaaaaaaaaaaaaa";
const BOB: &str = "bbbbbbbbbbbbbbbb";

struct World {
    env: SimEnv,
    store: MemoryStore<SimEnv>,
}

impl World {
    fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let store = MemoryStore::new(env.clone());
        Self { env, store }
    }

    fn peer(&self) -> (MemoryConnection<SimEnv>, RoomLifecycle<MemoryConnection<SimEnv>, SimEnv>) {
        let conn = self.store.connection();
        let rooms =
            RoomLifecycle::new(conn.clone(), self.env.clone(), RendezvousConfig::default()).unwrap();
        (conn, rooms)
    }

    fn key(&self) -> String {
        export_public_key(&KeyPair::generate(&self.env))
    }

    fn room_path(&self, code: &RoomCode) -> StorePath {
        StorePath::new(format!("blackkeep/rooms/{code}")).unwrap()
    }
}

fn peer_id(s: &str) -> PeerId {
    PeerId::parse(s).unwrap()
}

#[tokio::test(start_paused = true)]
async fn joiner_sees_creator_key() {
    let world = World::new(1);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();
    let alice_key = world.key();

    let code = alice.create(ALICE, &alice_key).await.unwrap();
    let joined = bob.join(code.as_str(), BOB, &world.key()).await.unwrap();

    assert_eq!(joined.room.code, code);
    assert_eq!(joined.peers.len(), 1);
    assert_eq!(joined.peers[0].peer_id, peer_id(ALICE));
    assert_eq!(joined.peers[0].public_key, alice_key);
    assert_eq!(alice.members(&code).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn join_normalizes_code() {
    let world = World::new(2);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    let typed = format!("  {}  ", code.as_str().to_lowercase());

    assert!(bob.join(&typed, BOB, &world.key()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn absent_and_expired_rooms_look_the_same() {
    let world = World::new(3);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let absent = bob.join("K7H3MQXZ", BOB, &world.key()).await.unwrap_err();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    alice.cancel_timers();
    tokio::time::sleep(Duration::from_secs(121)).await;
    let expired = bob.join(code.as_str(), BOB, &world.key()).await.unwrap_err();

    assert_eq!(absent, RendezvousError::RoomNotFound);
    assert_eq!(expired, absent);
}

#[tokio::test(start_paused = true)]
async fn join_after_ttl_destroys_room() {
    let world = World::new(4);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(121)).await;

    // Creator's expiry timer is still pending (TTL plus grace)
    assert!(world.store.contains(&world.room_path(&code)));

    let result = bob.join(code.as_str(), BOB, &world.key()).await;
    assert_eq!(result.unwrap_err(), RendezvousError::RoomNotFound);
    assert!(!world.store.contains(&world.room_path(&code)));
}

#[tokio::test(start_paused = true)]
async fn join_within_ttl_succeeds() {
    let world = World::new(5);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(119)).await;

    assert!(bob.join(code.as_str(), BOB, &world.key()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn expiry_timer_destroys_unjoined_room() {
    let world = World::new(6);
    let (_, alice) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    assert_eq!(alice.pending_timers(), 1);

    tokio::time::sleep(Duration::from_secs(126)).await;

    assert!(!world.store.contains(&world.room_path(&code)));
    assert_eq!(alice.pending_timers(), 0);
    assert_eq!(alice.room(&code).await.unwrap_err(), RendezvousError::RoomNotFound);
}

#[tokio::test(start_paused = true)]
async fn expire_is_a_noop_on_live_and_missing_rooms() {
    let world = World::new(7);
    let (_, alice) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    assert!(!alice.expire(&code).await);
    assert!(world.store.contains(&world.room_path(&code)));

    alice.burn(&code).await.unwrap();
    assert!(!alice.expire(&code).await);
}

#[tokio::test(start_paused = true)]
async fn burn_is_idempotent_and_cancels_timer() {
    let world = World::new(8);
    let (_, alice) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    alice.burn(&code).await.unwrap();
    alice.burn(&code).await.unwrap();

    assert_eq!(alice.pending_timers(), 0);
    assert!(!world.store.contains(&world.room_path(&code)));
}

#[tokio::test(start_paused = true)]
async fn burn_by_another_peer_drops_local_expiry_check() {
    let world = World::new(16);
    let config =
        RendezvousConfig { room_ttl: Duration::from_secs(3600), ..RendezvousConfig::default() };
    let alice =
        RoomLifecycle::new(world.store.connection(), world.env.clone(), config.clone()).unwrap();
    let bob = RoomLifecycle::new(world.store.connection(), world.env.clone(), config).unwrap();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    bob.join(code.as_str(), BOB, &world.key()).await.unwrap();
    assert_eq!(alice.pending_timers(), 1);
    assert_eq!(bob.pending_timers(), 1);

    bob.burn(&code).await.unwrap();
    assert_eq!(bob.pending_timers(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn leaving_peer_empties_room_and_clears_every_timer() {
    let world = World::new(17);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    bob.join(code.as_str(), BOB, &world.key()).await.unwrap();

    bob.leave(&code, &peer_id(BOB)).await;
    alice.leave(&code, &peer_id(ALICE)).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.pending_timers(), 0);
    assert_eq!(bob.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn last_member_leaving_burns_room() {
    let world = World::new(9);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    bob.join(code.as_str(), BOB, &world.key()).await.unwrap();

    alice.leave(&code, &peer_id(ALICE)).await;
    assert!(world.store.contains(&world.room_path(&code)));
    assert_eq!(bob.members(&code).await.unwrap().len(), 1);

    bob.leave(&code, &peer_id(BOB)).await;
    assert!(!world.store.contains(&world.room_path(&code)));
}

#[tokio::test(start_paused = true)]
async fn disconnect_removes_only_that_member() {
    let world = World::new(10);
    let (_, alice) = world.peer();
    let (bob_conn, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();
    bob.join(code.as_str(), BOB, &world.key()).await.unwrap();

    bob_conn.disconnect();

    let members = alice.members(&code).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].peer_id, peer_id(ALICE));
    assert_eq!(alice.peer_public_key(&code, &peer_id(BOB)).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn lockout_after_threshold() {
    let world = World::new(11);
    let (_, alice) = world.peer();
    let (_, bob) = world.peer();

    let code = alice.create(ALICE, &world.key()).await.unwrap();

    for attempt in 1..=4 {
        let status = alice.record_failed_attempt(&code).await.unwrap();
        assert_eq!(status.failed_attempts, attempt);
        assert!(!status.locked);
    }

    let fifth = alice.record_failed_attempt(&code).await.unwrap();
    assert!(fifth.locked);
    assert!(fifth.newly_locked);

    let sixth = alice.record_failed_attempt(&code).await.unwrap();
    assert_eq!(sixth.failed_attempts, 6);
    assert!(sixth.locked);
    assert!(!sixth.newly_locked);

    let result = bob.join(code.as_str(), BOB, &world.key()).await;
    assert_eq!(result.unwrap_err(), RendezvousError::RoomLocked);
}

#[tokio::test(start_paused = true)]
async fn concurrent_failed_attempts_lock_once() {
    let world = World::new(12);
    let (_, alice) = world.peer();
    let code = alice.create(ALICE, &world.key()).await.unwrap();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let (_, rooms) = world.peer();
            let code = code.clone();
            tokio::spawn(async move { rooms.record_failed_attempt(&code).await })
        })
        .collect();

    let mut statuses = Vec::new();
    for task in tasks {
        statuses.push(task.await.unwrap().unwrap());
    }

    let mut counts: Vec<u32> = statuses.iter().map(|s| s.failed_attempts).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert_eq!(statuses.iter().filter(|s| s.newly_locked).count(), 1);

    let meta = alice.room(&code).await.unwrap();
    assert_eq!(meta.failed_attempts, 5);
    assert!(meta.locked);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_on_missing_room() {
    let world = World::new(13);
    let (_, alice) = world.peer();
    let code = RoomCode::parse("K7H3MQXZ").unwrap();

    assert_eq!(alice.record_failed_attempt(&code).await, Err(RendezvousError::RoomNotFound));
}

#[tokio::test(start_paused = true)]
async fn malformed_input_is_rejected() {
    let world = World::new(14);
    let (_, bob) = world.peer();

    for code in ["", "K7H3MQX", "K7H3MQXZZ", "K7H3MQX0", "K7H3MQXL"] {
        let result = bob.join(code, BOB, &world.key()).await;
        assert!(matches!(result, Err(RendezvousError::InvalidInput(_))), "{code:?}");
    }

    let result = bob.join("K7H3MQXZ", "short", &world.key()).await;
    assert!(matches!(result, Err(RendezvousError::InvalidInput(_))));
}

#[tokio::test(start_paused = true)]
async fn watch_reports_lock_then_destruction() {
    let world = World::new(15);
    let (_, alice) = world.peer();
    let code = alice.create(ALICE, &world.key()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watch = alice
        .watch(&code, move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    for _ in 0..6 {
        alice.record_failed_attempt(&code).await.unwrap();
    }
    alice.burn(&code).await.unwrap();

    assert_eq!(rx.recv().await, Some(RoomEvent::Locked));
    assert_eq!(rx.recv().await, Some(RoomEvent::Destroyed));

    watch.close();
    watch.close();
    assert!(watch.is_closed());
}

#[tokio::test(start_paused = true)]
async fn watch_on_missing_room_reports_destroyed() {
    let world = World::new(16);
    let (_, alice) = world.peer();
    let code = RoomCode::parse("K7H3MQXZ").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _watch = alice
        .watch(&code, move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(RoomEvent::Destroyed));
}
