//! RTP plumbing tasks.

use std::sync::Arc;

use tracing::debug;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::types::PeerId;

/// Copy RTP packets from a publisher's remote track into its forwarding
/// track until either side errors. Packets are relayed unmodified, so
/// sequence numbers and timestamps stay continuous end to end; writes fan
/// out to subscriber bindings as UDP sends and cannot stall the read side.
pub fn spawn_rtp_forwarder(
    publisher: PeerId,
    remote: Arc<TrackRemote>,
    forwarding: Arc<TrackLocalStaticRTP>,
) {
    tokio::spawn(async move {
        loop {
            let packet = match remote.read_rtp().await {
                Ok((packet, _attrs)) => packet,
                Err(err) => {
                    debug!(peer_id = %publisher, error = %err, "remote track read ended");
                    break;
                }
            };
            if let Err(err) = forwarding.write_rtp(&packet).await {
                debug!(peer_id = %publisher, error = %err, "forwarding track write failed");
                break;
            }
        }
        debug!(peer_id = %publisher, "rtp forwarder stopped");
    });
}

/// Drain RTCP on an outgoing sender so the media stack keeps processing
/// feedback for the track.
pub fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}
