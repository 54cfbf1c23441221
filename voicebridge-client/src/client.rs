//! The outbound peer: signaling loop, media session and the RTP send path.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use voicebridge_core::forward::spawn_rtcp_drain;
use voicebridge_core::media::{
    self, audio_stream_id, audio_track_id, opus_codec_capability, OPUS_PAYLOAD_TYPE,
};
use voicebridge_core::{PeerId, SignalMessage};

use crate::error::ClientError;

/// Called with the publisher's id when a remote audio track arrives.
pub type AudioHandler = Arc<dyn Fn(PeerId, Arc<TrackRemote>) + Send + Sync>;

/// Called with `(peer, joined)` on membership changes.
pub type PeerEventHandler = Arc<dyn Fn(PeerId, bool) + Send + Sync>;

/// Called with the sender's id and the opaque base64 payload.
pub type ScreenshotHandler = Arc<dyn Fn(PeerId, String) + Send + Sync>;

const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

/// RTP clock ticks per 20 ms frame at 48 kHz.
const SAMPLES_PER_FRAME: u32 = 960;

struct RtpSendState {
    sequence: u16,
    timestamp: u32,
}

struct Connection {
    pc: Arc<RTCPeerConnection>,
    audio_track: Arc<TrackLocalStaticRTP>,
    cancel: CancellationToken,
}

/// A programmatic participant. `connect` is not re-entrant; `disconnect` is
/// idempotent. Handlers must be registered before `connect`.
pub struct BridgeClient {
    id: PeerId,
    server_url: String,
    connection: tokio::sync::Mutex<Option<Connection>>,
    rtp: Mutex<RtpSendState>,
    on_audio: RwLock<Option<AudioHandler>>,
    on_peer_event: RwLock<Option<PeerEventHandler>>,
    on_screenshot: RwLock<Option<ScreenshotHandler>>,
}

impl BridgeClient {
    pub fn new(id: impl Into<PeerId>, server_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            server_url: server_url.into(),
            connection: tokio::sync::Mutex::new(None),
            rtp: Mutex::new(RtpSendState {
                sequence: 0,
                timestamp: 0,
            }),
            on_audio: RwLock::new(None),
            on_peer_event: RwLock::new(None),
            on_screenshot: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn on_audio_received(&self, handler: AudioHandler) {
        *self.on_audio.write() = Some(handler);
    }

    pub fn on_peer_event(&self, handler: PeerEventHandler) {
        *self.on_peer_event.write() = Some(handler);
    }

    pub fn on_screenshot_received(&self, handler: ScreenshotHandler) {
        *self.on_screenshot.write() = Some(handler);
    }

    /// Dial the bridge, publish the audio track and join `room`. The server
    /// sends the initial offer once the join is processed.
    pub async fn connect(self: &Arc<Self>, room: &str) -> Result<(), ClientError> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let (ws_stream, _) = connect_async(self.server_url.as_str()).await?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let pc = media::create_peer_connection(DEFAULT_STUN).await?;

        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            opus_codec_capability(),
            audio_track_id(&self.id),
            audio_stream_id(&self.id),
        ));
        let sender = pc
            .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        spawn_rtcp_drain(sender);

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let cancel = CancellationToken::new();

        // Writer task: serialized signal messages onto the socket.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = signal_rx.recv() => {
                        let Some(msg) = msg else { break };
                        let json = match msg.to_json() {
                            Ok(json) => json,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize signal message");
                                continue;
                            }
                        };
                        if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = ws_sink.close().await;
        });

        self.install_media_callbacks(&pc, signal_tx.clone());

        // Reader task: route server messages until the socket closes.
        let client = Arc::clone(self);
        let reader_pc = Arc::clone(&pc);
        let reader_tx = signal_tx.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = ws_stream.next() => frame,
                };
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let msg = match SignalMessage::parse(&text) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(client_id = %client.id, error = %err, "ignoring malformed message");
                        continue;
                    }
                };
                client.dispatch(&reader_pc, &reader_tx, msg).await;
            }
            debug!(client_id = %client.id, "signaling read loop ended");
        });

        signal_tx
            .send(SignalMessage::Join {
                room: room.to_string(),
                client_id: self.id.to_string(),
            })
            .map_err(|_| ClientError::NotConnected)?;

        *slot = Some(Connection {
            pc,
            audio_track,
            cancel,
        });
        info!(client_id = %self.id, room, "connected to bridge");
        Ok(())
    }

    fn install_media_callbacks(
        self: &Arc<Self>,
        pc: &Arc<RTCPeerConnection>,
        signal_tx: mpsc::UnboundedSender<SignalMessage>,
    ) {
        pc.on_ice_candidate(Box::new(move |candidate| {
            let signal_tx = signal_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                if let Ok(json) = candidate.to_json() {
                    let _ = signal_tx.send(SignalMessage::Candidate {
                        candidate: json.candidate,
                    });
                }
            })
        }));

        let client = Arc::clone(self);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let client = Arc::clone(&client);
            Box::pin(async move {
                let stream_id = track.stream_id().to_string();
                // `stream-<peer>` encodes the publisher; anything else is
                // passed through untouched.
                let publisher = media::peer_id_from_stream_id(&stream_id)
                    .unwrap_or_else(|| PeerId::from(stream_id));
                info!(client_id = %client.id, publisher = %publisher, "remote audio track");
                if let Some(handler) = client.on_audio.read().clone() {
                    tokio::spawn(async move { handler(publisher, track) });
                }
            })
        }));

        let client_id = self.id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let client_id = client_id.clone();
            Box::pin(async move {
                debug!(client_id = %client_id, state = %state, "connection state changed");
            })
        }));
    }

    async fn dispatch(
        &self,
        pc: &Arc<RTCPeerConnection>,
        signal_tx: &mpsc::UnboundedSender<SignalMessage>,
        msg: SignalMessage,
    ) {
        match msg {
            SignalMessage::Offer { sdp } => {
                let outcome = async {
                    let offer = RTCSessionDescription::offer(sdp)?;
                    pc.set_remote_description(offer).await?;
                    let answer = pc.create_answer(None).await?;
                    pc.set_local_description(answer.clone()).await?;
                    signal_tx
                        .send(SignalMessage::Answer { sdp: answer.sdp })
                        .ok();
                    Ok::<_, webrtc::Error>(())
                }
                .await;
                if let Err(err) = outcome {
                    warn!(client_id = %self.id, error = %err, "failed to answer offer");
                }
            }
            SignalMessage::Answer { sdp } => {
                let outcome = async {
                    let answer = RTCSessionDescription::answer(sdp)?;
                    pc.set_remote_description(answer).await
                }
                .await;
                if let Err(err) = outcome {
                    warn!(client_id = %self.id, error = %err, "failed to apply answer");
                }
            }
            SignalMessage::Candidate { candidate } => {
                let init = webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
                    candidate,
                    ..Default::default()
                };
                if let Err(err) = pc.add_ice_candidate(init).await {
                    warn!(client_id = %self.id, error = %err, "failed to add candidate");
                }
            }
            SignalMessage::PeerJoined { client_id } => {
                info!(client_id = %self.id, peer = %client_id, "peer joined");
                if let Some(handler) = self.on_peer_event.read().clone() {
                    handler(PeerId::from(client_id), true);
                }
            }
            SignalMessage::PeerLeft { client_id } => {
                info!(client_id = %self.id, peer = %client_id, "peer left");
                if let Some(handler) = self.on_peer_event.read().clone() {
                    handler(PeerId::from(client_id), false);
                }
            }
            SignalMessage::Screenshot {
                client_id, data, ..
            } => {
                let from = PeerId::from(client_id.unwrap_or_default());
                info!(client_id = %self.id, from = %from, bytes = data.len(), "screenshot received");
                if let Some(handler) = self.on_screenshot.read().clone() {
                    handler(from, data);
                }
            }
            SignalMessage::Join { .. } | SignalMessage::Unknown => {
                debug!(client_id = %self.id, "ignoring unexpected signal message");
            }
        }
    }

    /// Write a pre-built RTP packet to the published track.
    pub async fn write_rtp(&self, data: &[u8]) -> Result<(), ClientError> {
        let track = self.audio_track().await?;
        track.write(data).await?;
        Ok(())
    }

    /// Wrap an Opus payload in an RTP header and write it. The sequence
    /// number and timestamp advance atomically per call; the timestamp moves
    /// by 960 ticks (20 ms at 48 kHz).
    pub async fn write_opus(&self, opus_payload: &[u8]) -> Result<(), ClientError> {
        let track = self.audio_track().await?;

        let (sequence_number, timestamp) = {
            let mut rtp = self.rtp.lock();
            let pair = (rtp.sequence, rtp.timestamp);
            rtp.sequence = rtp.sequence.wrapping_add(1);
            rtp.timestamp = rtp.timestamp.wrapping_add(SAMPLES_PER_FRAME);
            pair
        };

        let packet = Packet {
            header: Header {
                version: 2,
                padding: false,
                extension: false,
                marker: false,
                payload_type: OPUS_PAYLOAD_TYPE,
                sequence_number,
                timestamp,
                // The media stack rewrites the ssrc on the wire.
                ssrc: 0x1234_5678,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(opus_payload),
        };

        track.write_rtp(&packet).await?;
        Ok(())
    }

    async fn audio_track(&self) -> Result<Arc<TrackLocalStaticRTP>, ClientError> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.audio_track))
            .ok_or(ClientError::NotConnected)
    }

    /// Tear down the session and signaling tasks. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        connection.cancel.cancel();
        if let Err(err) = connection.pc.close().await {
            warn!(client_id = %self.id, error = %err, "failed to close media session");
        }
        info!(client_id = %self.id, "disconnected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_require_a_connection() {
        let client = BridgeClient::new("bot", "ws://localhost:8080/ws");
        assert!(matches!(
            client.write_opus(&[0xfc]).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.write_rtp(&[0u8; 12]).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        let client = BridgeClient::new("bot", "ws://localhost:8080/ws");
        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
        assert!(!client.is_connected().await);
    }
}
