//! AssemblyAI Universal Streaming transcription client.
//!
//! The service wants 16 kHz mono PCM in chunks of 50–1000 ms, so incoming
//! audio is downmixed, resampled and buffered to at least 100 ms before each
//! send. Transcripts are immutable: each `Turn` message carries all
//! finalized words, and only the new suffix is surfaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voicebridge_audio::resample_mono;

use crate::error::AgentError;
use crate::stt::{SpeechToText, SttConfig, TranscriptCallback, UtteranceEndCallback};

const ASSEMBLY_WS_URL: &str = "wss://streaming.assemblyai.com/v3/ws";

/// Target rate required by Universal Streaming.
const TARGET_RATE: u32 = 16_000;

/// Minimum chunk to send: 100 ms at 16 kHz mono s16le.
const MIN_AUDIO_BYTES: usize = 3_200;

#[derive(Deserialize)]
struct MessageType {
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct SessionBegins {
    #[serde(default)]
    session_id: String,
}

#[derive(Deserialize)]
struct TurnMessage {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    end_of_turn: bool,
    #[serde(default)]
    end_of_turn_confidence: f64,
}

struct Session {
    tx: mpsc::UnboundedSender<WsMessage>,
    cancel: CancellationToken,
}

pub struct AssemblyAiClient {
    config: SttConfig,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    audio_buffer: SyncMutex<Vec<u8>>,
    last_transcript: Arc<SyncMutex<String>>,
    on_transcript: Arc<RwLock<Option<TranscriptCallback>>>,
    on_utterance_end: Arc<RwLock<Option<UtteranceEndCallback>>>,
}

impl AssemblyAiClient {
    #[must_use]
    pub fn new(config: SttConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            audio_buffer: SyncMutex::new(Vec::with_capacity(MIN_AUDIO_BYTES * 2)),
            last_transcript: Arc::new(SyncMutex::new(String::new())),
            on_transcript: Arc::new(RwLock::new(None)),
            on_utterance_end: Arc::new(RwLock::new(None)),
        }
    }

    /// Downmix interleaved stereo s16le to mono by averaging channels.
    fn downmix_to_mono(pcm: &[u8]) -> Vec<u8> {
        let mut mono = Vec::with_capacity(pcm.len() / 2);
        for frame in pcm.chunks_exact(4) {
            let left = i32::from(i16::from_le_bytes([frame[0], frame[1]]));
            let right = i32::from(i16::from_le_bytes([frame[2], frame[3]]));
            let sample = ((left + right) / 2) as i16;
            mono.extend_from_slice(&sample.to_le_bytes());
        }
        mono
    }
}

#[async_trait]
impl SpeechToText for AssemblyAiClient {
    fn on_transcript(&self, callback: TranscriptCallback) {
        *self.on_transcript.write() = Some(callback);
    }

    fn on_utterance_end(&self, callback: UtteranceEndCallback) {
        *self.on_utterance_end.write() = Some(callback);
    }

    async fn connect(&self) -> Result<(), AgentError> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        // format_turns is required to receive Turn messages at all.
        let url = format!("{ASSEMBLY_WS_URL}?sample_rate={TARGET_RATE}&format_turns=true");
        let mut request = url.into_client_request().map_err(AgentError::WebSocket)?;
        let auth = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| AgentError::Config("api key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        self.audio_buffer.lock().clear();
        self.last_transcript.lock().clear();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let connected = Arc::clone(&self.connected);
        let last_transcript = Arc::clone(&self.last_transcript);
        let on_transcript = Arc::clone(&self.on_transcript);
        let on_utterance_end = Arc::clone(&self.on_utterance_end);
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = stream.next() => frame,
                };
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let Ok(MessageType { kind }) = serde_json::from_str::<MessageType>(&text) else {
                    continue;
                };

                match kind.as_str() {
                    "Begin" | "SessionBegins" => {
                        if let Ok(begin) = serde_json::from_str::<SessionBegins>(&text) {
                            info!(session_id = %begin.session_id, "assemblyai session started");
                        }
                    }
                    "Turn" => {
                        let Ok(turn) = serde_json::from_str::<TurnMessage>(&text) else {
                            continue;
                        };
                        if !turn.transcript.is_empty() {
                            let new_text = {
                                let mut last = last_transcript.lock();
                                if turn.transcript == *last {
                                    None
                                } else {
                                    let suffix = if !last.is_empty()
                                        && turn.transcript.len() > last.len()
                                    {
                                        turn.transcript[last.len()..].to_string()
                                    } else {
                                        turn.transcript.clone()
                                    };
                                    *last = turn.transcript.clone();
                                    Some(suffix)
                                }
                            };
                            if let Some(new_text) = new_text {
                                // Immutable transcripts are always final.
                                if let Some(callback) = on_transcript.read().clone() {
                                    callback(new_text, true);
                                }
                            }
                        }
                        if turn.end_of_turn {
                            debug!(
                                confidence = turn.end_of_turn_confidence,
                                "end of turn detected"
                            );
                            last_transcript.lock().clear();
                            if let Some(callback) = on_utterance_end.read().clone() {
                                callback();
                            }
                        }
                    }
                    "Termination" | "SessionTerminated" => {
                        info!("assemblyai session terminated");
                        break;
                    }
                    "Error" => warn!(message = %text, "assemblyai error"),
                    _ => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            debug!("assemblyai read loop ended");
        });

        *session = Some(Session { tx, cancel });
        info!("connected to AssemblyAI Universal Streaming");
        Ok(())
    }

    async fn send_audio(&self, pcm: &[u8]) -> Result<(), AgentError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Err(AgentError::NotConnected);
        };
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AgentError::NotConnected);
        }

        let mono = if self.config.channels == 2 {
            Self::downmix_to_mono(pcm)
        } else {
            pcm.to_vec()
        };
        let resampled = resample_mono(&mono, self.config.sample_rate, TARGET_RATE);

        let chunk = {
            let mut buffer = self.audio_buffer.lock();
            buffer.extend_from_slice(&resampled);
            if buffer.len() >= MIN_AUDIO_BYTES {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(chunk) = chunk {
            session
                .tx
                .send(WsMessage::Binary(chunk))
                .map_err(|_| AgentError::NotConnected)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        if session
            .tx
            .send(WsMessage::Text(r#"{"terminate_session":true}"#.to_string()))
            .is_err()
        {
            warn!("assemblyai terminate message not delivered");
        }
        session.cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);
        info!("disconnected from AssemblyAI");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_the_channels() {
        let stereo: Vec<u8> = [100i16, 200, -100, 100]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mono = AssemblyAiClient::downmix_to_mono(&stereo);
        let samples: Vec<i16> = mono
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![150, 0]);
    }

    #[test]
    fn turn_message_parses() {
        let json = r#"{
            "type": "Turn",
            "turn_order": 1,
            "transcript": "hello world",
            "end_of_turn": true,
            "end_of_turn_confidence": 0.91
        }"#;
        let turn: TurnMessage = serde_json::from_str(json).unwrap();
        assert_eq!(turn.transcript, "hello world");
        assert!(turn.end_of_turn);
    }

    #[tokio::test]
    async fn send_audio_requires_a_connection() {
        let client = AssemblyAiClient::new(SttConfig::new("key".into()));
        assert!(matches!(
            client.send_audio(&[0u8; 8]).await,
            Err(AgentError::NotConnected)
        ));
    }
}
