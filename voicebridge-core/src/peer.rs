//! Per-participant session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::warn;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::error::{Error, Result};
use crate::room::Room;
use crate::signal::SignalMessage;
use crate::types::PeerId;

/// A connected participant: its signaling channel, its media session and the
/// forwarding tracks it publishes into the room.
///
/// Signal writes are serialized by a dedicated writer task behind
/// `signal_tx`; media-stack callbacks may run on background threads, so the
/// track maps sit behind their own mutexes. A peer belongs to at most one
/// room for its lifetime.
pub struct Peer {
    id: PeerId,
    signal_tx: mpsc::UnboundedSender<SignalMessage>,
    pc: Arc<RTCPeerConnection>,

    /// Non-owning back-reference, set by `Room::add` and cleared on removal.
    room: RwLock<Weak<Room>>,

    /// remote track id -> local track fed by this peer's published audio.
    /// An entry exists only once the remote track has actually arrived.
    forwarding_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticRTP>>>,

    /// forwarding track id -> sender on *this* peer's session carrying
    /// another publisher's audio. Needed to unwire tracks when that
    /// publisher departs.
    outbound_senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,

    negotiation_requested: AtomicBool,
    negotiation_gate: tokio::sync::Mutex<()>,
    disconnected: AtomicBool,
}

impl Peer {
    pub fn new(
        id: PeerId,
        signal_tx: mpsc::UnboundedSender<SignalMessage>,
        pc: Arc<RTCPeerConnection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            signal_tx,
            pc,
            room: RwLock::new(Weak::new()),
            forwarding_tracks: Mutex::new(HashMap::new()),
            outbound_senders: Mutex::new(HashMap::new()),
            negotiation_requested: AtomicBool::new(false),
            negotiation_gate: tokio::sync::Mutex::new(()),
            disconnected: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub fn pc(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Queue a signaling message for the writer task.
    pub fn send(&self, msg: SignalMessage) -> Result<()> {
        self.signal_tx
            .send(msg)
            .map_err(|_| Error::PeerGone(self.id.clone()))
    }

    /// Room this peer currently belongs to, if any.
    #[must_use]
    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.read().upgrade()
    }

    pub(crate) fn set_room(&self, room: &Arc<Room>) {
        *self.room.write() = Arc::downgrade(room);
    }

    pub(crate) fn clear_room(&self) {
        *self.room.write() = Weak::new();
    }

    /// Record a forwarding track for a remote track id.
    pub fn record_forwarding_track(&self, remote_track_id: String, track: Arc<TrackLocalStaticRTP>) {
        self.forwarding_tracks.lock().insert(remote_track_id, track);
    }

    /// Snapshot of the forwarding tracks this peer publishes.
    #[must_use]
    pub fn forwarding_tracks(&self) -> Vec<Arc<TrackLocalStaticRTP>> {
        self.forwarding_tracks.lock().values().cloned().collect()
    }

    pub fn record_outbound_sender(&self, track_id: String, sender: Arc<RTCRtpSender>) {
        self.outbound_senders.lock().insert(track_id, sender);
    }

    pub fn take_outbound_sender(&self, track_id: &str) -> Option<Arc<RTCRtpSender>> {
        self.outbound_senders.lock().remove(track_id)
    }

    /// Track ids currently wired onto this peer's session.
    #[must_use]
    pub fn outbound_track_ids(&self) -> Vec<String> {
        self.outbound_senders.lock().keys().cloned().collect()
    }

    pub(crate) fn request_negotiation(&self) {
        self.negotiation_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_negotiation_request(&self) -> bool {
        self.negotiation_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn negotiation_requested(&self) -> bool {
        self.negotiation_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn negotiation_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.negotiation_gate
    }

    /// First caller wins; every later call observes `false`. Both the
    /// signaling read loop and connection-state callbacks race into the
    /// disconnect path.
    pub(crate) fn begin_disconnect(&self) -> bool {
        !self.disconnected.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Tear down the media session. Safe to call more than once.
    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(peer_id = %self.id, error = %err, "failed to close media session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::create_peer_connection;

    async fn test_peer(id: &str) -> (Arc<Peer>, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pc = create_peer_connection("stun:stun.l.google.com:19302")
            .await
            .unwrap();
        (Peer::new(PeerId::from(id), tx, pc), rx)
    }

    #[tokio::test]
    async fn send_queues_messages_in_order() {
        let (peer, mut rx) = test_peer("alice").await;
        peer.send(SignalMessage::PeerJoined {
            client_id: "bob".into(),
        })
        .unwrap();
        peer.send(SignalMessage::PeerLeft {
            client_id: "bob".into(),
        })
        .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SignalMessage::PeerJoined { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SignalMessage::PeerLeft { .. }
        ));
        peer.close().await;
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (peer, rx) = test_peer("alice").await;
        drop(rx);
        assert!(matches!(
            peer.send(SignalMessage::PeerLeft {
                client_id: "x".into()
            }),
            Err(Error::PeerGone(_))
        ));
        peer.close().await;
    }

    #[tokio::test]
    async fn begin_disconnect_is_first_caller_wins() {
        let (peer, _rx) = test_peer("alice").await;
        assert!(peer.begin_disconnect());
        assert!(!peer.begin_disconnect());
        assert!(peer.is_disconnected());
        peer.close().await;
    }
}
