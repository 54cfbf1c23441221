//! Room membership.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::peer::Peer;
use crate::signal::SignalMessage;
use crate::types::{PeerId, RoomId};

/// A set of peers sharing one audio mesh. Peer ids are unique within a room.
///
/// Lookups take snapshots under the read lock; no method holds the lock
/// across a peer's send path except [`Room::broadcast_except`], whose sends
/// are non-blocking channel pushes.
pub struct Room {
    id: RoomId,
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
}

impl Room {
    pub fn new(id: RoomId) -> Arc<Self> {
        Arc::new(Self {
            id,
            peers: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Insert a peer and set its back-reference. A duplicate id evicts the
    /// prior entry.
    pub async fn add(self: &Arc<Self>, peer: Arc<Peer>) {
        peer.set_room(self);
        let prior = self
            .peers
            .write()
            .await
            .insert(peer.id().clone(), peer.clone());
        if let Some(prior) = prior {
            warn!(room_id = %self.id, peer_id = %prior.id(), "duplicate peer id, evicting prior session");
            prior.clear_room();
        }
    }

    /// Remove a peer by id. Idempotent.
    pub async fn remove(&self, peer_id: &PeerId) -> Option<Arc<Peer>> {
        let removed = self.peers.write().await.remove(peer_id);
        if let Some(peer) = &removed {
            peer.clear_room();
            debug!(room_id = %self.id, peer_id = %peer_id, "peer removed from room");
        }
        removed
    }

    /// Snapshot of every peer except `exclude`. Safe to iterate without the
    /// room lock.
    pub async fn others(&self, exclude: &PeerId) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id != exclude)
            .map(|(_, peer)| peer.clone())
            .collect()
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Send a message to every peer except `exclude`. A failed send is
    /// logged and does not stop the broadcast.
    pub async fn broadcast_except(&self, exclude: &PeerId, msg: &SignalMessage) {
        for peer in self.others(exclude).await {
            if let Err(err) = peer.send(msg.clone()) {
                warn!(
                    room_id = %self.id,
                    peer_id = %peer.id(),
                    error = %err,
                    "failed to deliver broadcast"
                );
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::create_peer_connection;
    use tokio::sync::mpsc;

    async fn test_peer(id: &str) -> (Arc<Peer>, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pc = create_peer_connection("stun:stun.l.google.com:19302")
            .await
            .unwrap();
        (Peer::new(PeerId::from(id), tx, pc), rx)
    }

    #[tokio::test]
    async fn add_sets_back_reference() {
        let room = Room::new(RoomId::from("r1"));
        let (peer, _rx) = test_peer("alice").await;

        room.add(peer.clone()).await;
        assert_eq!(room.peer_count().await, 1);
        assert!(Arc::ptr_eq(&peer.room().unwrap(), &room));

        room.remove(peer.id()).await;
        assert!(peer.room().is_none());
        peer.close().await;
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let room = Room::new(RoomId::from("r1"));
        let (peer, _rx) = test_peer("alice").await;

        room.add(peer.clone()).await;
        assert!(room.remove(peer.id()).await.is_some());
        assert!(room.remove(peer.id()).await.is_none());
        assert!(room.is_empty().await);
        peer.close().await;
    }

    #[tokio::test]
    async fn others_excludes_the_given_peer() {
        let room = Room::new(RoomId::from("r1"));
        let (alice, _arx) = test_peer("alice").await;
        let (bob, _brx) = test_peer("bob").await;

        room.add(alice.clone()).await;
        room.add(bob.clone()).await;

        let others = room.others(alice.id()).await;
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), bob.id());

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_survives_dead_recipients() {
        let room = Room::new(RoomId::from("r1"));
        let (alice, mut alice_rx) = test_peer("alice").await;
        let (bob, bob_rx) = test_peer("bob").await;
        let (carol, mut carol_rx) = test_peer("carol").await;

        room.add(alice.clone()).await;
        room.add(bob.clone()).await;
        room.add(carol.clone()).await;

        // Bob's socket is gone; the broadcast must still reach Carol.
        drop(bob_rx);

        room.broadcast_except(
            alice.id(),
            &SignalMessage::PeerJoined {
                client_id: "alice".into(),
            },
        )
        .await;

        assert!(matches!(
            carol_rx.recv().await.unwrap(),
            SignalMessage::PeerJoined { client_id } if client_id == "alice"
        ));
        assert!(alice_rx.try_recv().is_err());

        alice.close().await;
        bob.close().await;
        carol.close().await;
    }
}
