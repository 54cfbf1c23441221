//! SFU controller: join/leave orchestration and track wiring.
//!
//! Reacts to signaling events (join, offer, answer, candidate, screenshot)
//! and to media events (remote track received, connection state changed),
//! keeping every peer subscribed to every other publisher in its room.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::forward::{spawn_rtcp_drain, spawn_rtp_forwarder};
use crate::media;
use crate::peer::Peer;
use crate::registry::RoomRegistry;
use crate::signal::SignalMessage;
use crate::types::{PeerId, RoomId};

pub struct SfuController {
    registry: RoomRegistry,
    config: ServerConfig,
}

impl SfuController {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: RoomRegistry::new(),
            config,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Admit a peer to a room and start media negotiation.
    ///
    /// The order matters: existing peers learn about the newcomer before it
    /// is inserted (so it never sees its own `peer_joined`), existing
    /// forwarding tracks are wired onto the newcomer, a receive-only
    /// transceiver makes room for its microphone, and only then does the
    /// initial offer go out.
    pub async fn handle_join(
        self: &Arc<Self>,
        room_id: RoomId,
        peer_id: PeerId,
        signal_tx: mpsc::UnboundedSender<SignalMessage>,
    ) -> Result<Arc<Peer>> {
        info!(room_id = %room_id, peer_id = %peer_id, "peer joining");

        let pc = media::create_peer_connection(&self.config.stun_server).await?;
        let peer = Peer::new(peer_id.clone(), signal_tx, pc);
        self.install_callbacks(&peer);

        let room = self.registry.get_or_create(&room_id);
        room.broadcast_except(
            &peer_id,
            &SignalMessage::PeerJoined {
                client_id: peer_id.to_string(),
            },
        )
        .await;
        room.add(peer.clone()).await;

        for existing in room.others(&peer_id).await {
            for track in existing.forwarding_tracks() {
                if let Err(err) = Self::add_track_to_peer(&peer, track).await {
                    warn!(
                        peer_id = %peer_id,
                        publisher = %existing.id(),
                        error = %err,
                        "failed to wire existing track onto newcomer"
                    );
                }
            }
        }

        if let Err(err) = peer
            .pc()
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
        {
            warn!(peer_id = %peer_id, error = %err, "failed to add receive transceiver");
        }

        Self::trigger_negotiation(&peer).await;
        Ok(peer)
    }

    fn install_callbacks(self: &Arc<Self>, peer: &Arc<Peer>) {
        let pc = peer.pc().clone();

        let weak = Arc::downgrade(peer);
        pc.on_ice_candidate(Box::new(move |candidate| {
            let weak = weak.clone();
            Box::pin(async move {
                let (Some(candidate), Some(peer)) = (candidate, weak.upgrade()) else {
                    return;
                };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = peer.send(SignalMessage::Candidate {
                            candidate: json.candidate,
                        });
                    }
                    Err(err) => {
                        warn!(peer_id = %peer.id(), error = %err, "failed to serialize candidate");
                    }
                }
            })
        }));

        let controller = Arc::clone(self);
        let weak = Arc::downgrade(peer);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let controller = Arc::clone(&controller);
            let weak = weak.clone();
            Box::pin(async move {
                let Some(peer) = weak.upgrade() else { return };
                // The read loop must not run inside the on_track callback,
                // or the handler mutex blocks every later track.
                tokio::spawn(async move {
                    controller.on_remote_track(peer, track).await;
                });
            })
        }));

        let controller = Arc::clone(self);
        let weak = Arc::downgrade(peer);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let controller = Arc::clone(&controller);
            let weak = weak.clone();
            Box::pin(async move {
                let Some(peer) = weak.upgrade() else { return };
                debug!(peer_id = %peer.id(), state = %state, "connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    controller.disconnect(&peer).await;
                }
            })
        }));
    }

    /// A publisher's track arrived: allocate its forwarding track, wire it
    /// onto every other peer in the room, and start the copy loop.
    async fn on_remote_track(self: Arc<Self>, peer: Arc<Peer>, track: Arc<TrackRemote>) {
        let codec = track.codec();
        info!(
            peer_id = %peer.id(),
            mime_type = %codec.capability.mime_type,
            "remote track received"
        );

        let forwarding = Arc::new(TrackLocalStaticRTP::new(
            codec.capability.clone(),
            media::audio_track_id(peer.id()),
            media::audio_stream_id(peer.id()),
        ));
        peer.record_forwarding_track(track.id().to_string(), forwarding.clone());

        if let Some(room) = peer.room() {
            for other in room.others(peer.id()).await {
                if let Err(err) = Self::add_track_to_peer(&other, forwarding.clone()).await {
                    warn!(
                        subscriber = %other.id(),
                        publisher = %peer.id(),
                        error = %err,
                        "failed to add forwarding track to subscriber"
                    );
                }
            }
        }

        spawn_rtp_forwarder(peer.id().clone(), track, forwarding);
    }

    /// Wire a forwarding track onto a subscriber and renegotiate it.
    async fn add_track_to_peer(peer: &Arc<Peer>, track: Arc<TrackLocalStaticRTP>) -> Result<()> {
        let track_id = track.id().to_string();
        let sender = peer
            .pc()
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        spawn_rtcp_drain(sender.clone());
        peer.record_outbound_sender(track_id, sender);
        Self::trigger_negotiation(peer).await;
        Ok(())
    }

    /// Generate and send an offer, serialized per peer: while one offer is
    /// in flight, further triggers coalesce into a single follow-up.
    pub async fn trigger_negotiation(peer: &Arc<Peer>) {
        peer.request_negotiation();
        loop {
            let Ok(guard) = peer.negotiation_gate().try_lock() else {
                // Another task is negotiating and will pick up the request.
                return;
            };
            while peer.clear_negotiation_request() {
                if let Err(err) = Self::send_offer(peer).await {
                    warn!(peer_id = %peer.id(), error = %err, "offer generation failed");
                }
            }
            drop(guard);
            if !peer.negotiation_requested() {
                return;
            }
        }
    }

    async fn send_offer(peer: &Arc<Peer>) -> Result<()> {
        let offer = peer.pc().create_offer(None).await?;
        peer.pc().set_local_description(offer.clone()).await?;
        peer.send(SignalMessage::Offer { sdp: offer.sdp })?;
        Ok(())
    }

    /// Answer an offer from the far side. Failures leave the session alive;
    /// the next offer/answer cycle may recover.
    pub async fn handle_offer(&self, peer: &Arc<Peer>, sdp: String) {
        let outcome = async {
            let offer = RTCSessionDescription::offer(sdp)?;
            peer.pc().set_remote_description(offer).await?;
            let answer = peer.pc().create_answer(None).await?;
            peer.pc().set_local_description(answer.clone()).await?;
            peer.send(SignalMessage::Answer { sdp: answer.sdp })?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(err) = outcome {
            warn!(peer_id = %peer.id(), error = %err, "failed to handle offer");
        }
    }

    pub async fn handle_answer(&self, peer: &Arc<Peer>, sdp: String) {
        let outcome = async {
            let answer = RTCSessionDescription::answer(sdp)?;
            peer.pc().set_remote_description(answer).await?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(err) = outcome {
            warn!(peer_id = %peer.id(), error = %err, "failed to handle answer");
        }
    }

    /// Hand a trickle candidate to the media stack unchanged.
    pub async fn handle_candidate(&self, peer: &Arc<Peer>, candidate: String) {
        let init = RTCIceCandidateInit {
            candidate,
            ..Default::default()
        };
        if let Err(err) = peer.pc().add_ice_candidate(init).await {
            warn!(peer_id = %peer.id(), error = %err, "failed to add ice candidate");
        }
    }

    /// Forward a screenshot blob to a named peer in the sender's room. An
    /// unknown target drops the message; the sender gets no error.
    pub async fn handle_screenshot(&self, peer: &Arc<Peer>, target_id: &PeerId, data: String) {
        let Some(room) = peer.room() else {
            warn!(peer_id = %peer.id(), "screenshot from peer without a room");
            return;
        };
        let Some(target) = room.get(target_id).await else {
            debug!(
                peer_id = %peer.id(),
                target_id = %target_id,
                "screenshot target not in room, dropping"
            );
            return;
        };

        info!(
            from = %peer.id(),
            to = %target_id,
            bytes = data.len(),
            "forwarding screenshot"
        );
        if let Err(err) = target.send(SignalMessage::Screenshot {
            target_id: None,
            client_id: Some(peer.id().to_string()),
            data,
        }) {
            warn!(target_id = %target_id, error = %err, "failed to deliver screenshot");
        }
    }

    /// Single cleanup chokepoint: remove the peer from its room, tell the
    /// survivors, unwire its forwarding tracks from them, and close its
    /// media session. Idempotent: the read loop and connection-state
    /// callbacks may both land here.
    pub async fn disconnect(&self, peer: &Arc<Peer>) {
        if !peer.begin_disconnect() {
            return;
        }
        info!(peer_id = %peer.id(), "peer disconnected");

        if let Some(room) = peer.room() {
            room.remove(peer.id()).await;
            room.broadcast_except(
                peer.id(),
                &SignalMessage::PeerLeft {
                    client_id: peer.id().to_string(),
                },
            )
            .await;

            let track_id = media::audio_track_id(peer.id());
            for other in room.others(peer.id()).await {
                if let Some(sender) = other.take_outbound_sender(&track_id) {
                    if let Err(err) = other.pc().remove_track(&sender).await {
                        warn!(
                            subscriber = %other.id(),
                            error = %err,
                            "failed to remove departed peer's track"
                        );
                    }
                    Self::trigger_negotiation(&other).await;
                }
            }
        }

        peer.close().await;
    }
}
