//! Signaling-level behavior of the SFU controller, driven without a network.
//!
//! Peers are joined through the controller directly with channel-backed
//! signaling sockets; media sessions are real but never complete ICE.

use std::sync::Arc;

use tokio::sync::mpsc;

use voicebridge_core::{Peer, PeerId, RoomId, ServerConfig, SfuController, SignalMessage};

struct TestPeer {
    peer: Arc<Peer>,
    rx: mpsc::UnboundedReceiver<SignalMessage>,
}

impl TestPeer {
    async fn join(controller: &Arc<SfuController>, room: &str, id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = controller
            .handle_join(RoomId::from(room), PeerId::from(id), tx)
            .await
            .expect("join failed");
        Self { peer, rx }
    }

    fn drain(&mut self) -> Vec<SignalMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}

fn controller() -> Arc<SfuController> {
    SfuController::new(ServerConfig::default())
}

#[tokio::test]
async fn join_sends_an_initial_offer() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;

    // Trickled candidates may interleave, but the offer must be there.
    let messages = alice.drain();
    assert!(
        messages
            .iter()
            .any(|m| matches!(m, SignalMessage::Offer { .. })),
        "expected an initial offer, got {messages:?}"
    );

    controller.disconnect(&alice.peer).await;
}

#[tokio::test]
async fn second_join_notifies_only_the_first_peer() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;
    alice.drain();

    let mut bob = TestPeer::join(&controller, "r1", "bob").await;

    let to_alice = alice.drain();
    assert!(
        to_alice
            .iter()
            .any(|m| matches!(m, SignalMessage::PeerJoined { client_id } if client_id == "bob")),
        "alice should learn about bob: {to_alice:?}"
    );

    // Bob never observes a peer_joined for himself.
    let to_bob = bob.drain();
    assert!(
        !to_bob
            .iter()
            .any(|m| matches!(m, SignalMessage::PeerJoined { client_id } if client_id == "bob")),
        "bob saw his own join: {to_bob:?}"
    );
    assert!(to_bob
        .iter()
        .any(|m| matches!(m, SignalMessage::Offer { .. })));

    controller.disconnect(&alice.peer).await;
    controller.disconnect(&bob.peer).await;
}

#[tokio::test]
async fn disconnect_broadcasts_peer_left_once() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;
    let mut carol = TestPeer::join(&controller, "r1", "carol").await;
    let bob = TestPeer::join(&controller, "r1", "bob").await;
    alice.drain();
    carol.drain();

    controller.disconnect(&bob.peer).await;
    // A second invocation (e.g. the connection-state callback racing the
    // read loop) must be a no-op.
    controller.disconnect(&bob.peer).await;

    let left_seen = |messages: &[SignalMessage]| {
        messages
            .iter()
            .filter(|m| matches!(m, SignalMessage::PeerLeft { client_id } if client_id == "bob"))
            .count()
    };

    assert_eq!(left_seen(&alice.drain()), 1);
    assert_eq!(left_seen(&carol.drain()), 1);

    let room = controller.registry().get(&RoomId::from("r1")).unwrap();
    assert_eq!(room.peer_count().await, 2);

    controller.disconnect(&alice.peer).await;
    controller.disconnect(&carol.peer).await;
}

#[tokio::test]
async fn join_then_disconnect_restores_the_peer_set() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;
    alice.drain();

    let bob = TestPeer::join(&controller, "r1", "bob").await;
    controller.disconnect(&bob.peer).await;

    let room = controller.registry().get(&RoomId::from("r1")).unwrap();
    assert_eq!(room.peer_count().await, 1);
    assert!(room.get(&PeerId::from("alice")).await.is_some());

    let to_alice = alice.drain();
    let joins = to_alice
        .iter()
        .filter(|m| matches!(m, SignalMessage::PeerJoined { client_id } if client_id == "bob"))
        .count();
    let leaves = to_alice
        .iter()
        .filter(|m| matches!(m, SignalMessage::PeerLeft { client_id } if client_id == "bob"))
        .count();
    assert_eq!((joins, leaves), (1, 1));

    controller.disconnect(&alice.peer).await;
}

#[tokio::test]
async fn screenshot_reaches_only_the_named_target() {
    let controller = controller();
    let alice = TestPeer::join(&controller, "r1", "alice").await;
    let mut bob = TestPeer::join(&controller, "r1", "bob").await;
    let mut carol = TestPeer::join(&controller, "r1", "carol").await;
    bob.drain();
    carol.drain();

    controller
        .handle_screenshot(&alice.peer, &PeerId::from("bob"), "QUJD".into())
        .await;

    let to_bob = bob.drain();
    assert!(to_bob.iter().any(|m| matches!(
        m,
        SignalMessage::Screenshot { client_id: Some(from), data, .. }
            if from == "alice" && data == "QUJD"
    )));
    assert!(!carol
        .drain()
        .iter()
        .any(|m| matches!(m, SignalMessage::Screenshot { .. })));

    controller.disconnect(&alice.peer).await;
    controller.disconnect(&bob.peer).await;
    controller.disconnect(&carol.peer).await;
}

#[tokio::test]
async fn screenshot_to_unknown_target_is_dropped_silently() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;
    let mut bob = TestPeer::join(&controller, "r1", "bob").await;
    alice.drain();
    bob.drain();

    controller
        .handle_screenshot(&alice.peer, &PeerId::from("zz"), "x".into())
        .await;

    assert!(alice.drain().is_empty());
    assert!(bob
        .drain()
        .iter()
        .all(|m| !matches!(m, SignalMessage::Screenshot { .. })));

    controller.disconnect(&alice.peer).await;
    controller.disconnect(&bob.peer).await;
}

#[tokio::test]
async fn peers_join_distinct_rooms_independently() {
    let controller = controller();
    let mut alice = TestPeer::join(&controller, "r1", "alice").await;
    alice.drain();

    let _bob = TestPeer::join(&controller, "r2", "bob").await;

    // Different room: alice hears nothing about bob.
    assert!(!alice
        .drain()
        .iter()
        .any(|m| matches!(m, SignalMessage::PeerJoined { .. })));
    assert_eq!(controller.registry().room_count(), 2);
}
