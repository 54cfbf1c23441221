//! Media session construction and track naming conventions.
//!
//! Every session negotiates exactly one audio codec: Opus at 48 kHz stereo,
//! payload type 111, with in-band FEC. Track ids are `audio-<peer>` and
//! stream ids `stream-<peer>`, so a subscriber can recover the publisher
//! identity from the stream id alone.

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use crate::error::Result;
use crate::types::PeerId;

pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const OPUS_CLOCK_RATE: u32 = 48_000;
pub const OPUS_CHANNELS: u16 = 2;
pub const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";

const TRACK_PREFIX: &str = "audio-";
const STREAM_PREFIX: &str = "stream-";

/// The single codec offered on every media session.
#[must_use]
pub fn opus_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: OPUS_CHANNELS,
        sdp_fmtp_line: OPUS_FMTP.to_string(),
        rtcp_feedback: vec![],
    }
}

/// Build a peer connection with the Opus-only media engine and one STUN
/// server.
pub async fn create_peer_connection(stun_server: &str) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: opus_codec_capability(),
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![stun_server.to_string()],
            ..Default::default()
        }],
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Track id for a peer's forwarded audio.
#[must_use]
pub fn audio_track_id(peer_id: &PeerId) -> String {
    format!("{TRACK_PREFIX}{peer_id}")
}

/// Stream id carrying a peer's forwarded audio.
#[must_use]
pub fn audio_stream_id(peer_id: &PeerId) -> String {
    format!("{STREAM_PREFIX}{peer_id}")
}

/// Recover the publisher id from a stream id, if it follows the bridge's
/// naming convention.
#[must_use]
pub fn peer_id_from_stream_id(stream_id: &str) -> Option<PeerId> {
    stream_id.strip_prefix(STREAM_PREFIX).map(PeerId::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_naming_round_trips() {
        let peer = PeerId::from("alice");
        assert_eq!(audio_track_id(&peer), "audio-alice");
        assert_eq!(audio_stream_id(&peer), "stream-alice");
        assert_eq!(
            peer_id_from_stream_id("stream-alice"),
            Some(PeerId::from("alice"))
        );
    }

    #[test]
    fn foreign_stream_id_is_rejected() {
        assert_eq!(peer_id_from_stream_id("mic-alice"), None);
        assert_eq!(peer_id_from_stream_id(""), None);
    }

    #[tokio::test]
    async fn peer_connection_builds_offline() {
        let pc = create_peer_connection("stun:stun.l.google.com:19302")
            .await
            .unwrap();
        let offer = pc.create_offer(None).await.unwrap();
        assert!(offer.sdp.contains("opus"));
        pc.close().await.unwrap();
    }
}
