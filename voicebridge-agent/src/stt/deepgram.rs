//! Deepgram real-time transcription client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::stt::{SpeechToText, SttConfig, TranscriptCallback, UtteranceEndCallback};

const DEEPGRAM_WS_URL: &str = "wss://api.deepgram.com/v1/listen";

#[derive(Deserialize)]
struct MessageType {
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    channel: Channel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Deserialize, Default)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

struct Session {
    tx: mpsc::UnboundedSender<WsMessage>,
    cancel: CancellationToken,
}

pub struct DeepgramClient {
    config: SttConfig,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    on_transcript: Arc<RwLock<Option<TranscriptCallback>>>,
    on_utterance_end: Arc<RwLock<Option<UtteranceEndCallback>>>,
}

impl DeepgramClient {
    #[must_use]
    pub fn new(config: SttConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            on_transcript: Arc::new(RwLock::new(None)),
            on_utterance_end: Arc::new(RwLock::new(None)),
        }
    }

    fn listen_url(&self) -> String {
        format!(
            "{DEEPGRAM_WS_URL}?encoding=linear16&sample_rate={}&channels={}&punctuate=true&interim_results=true&utterance_end_ms={}",
            self.config.sample_rate, self.config.channels, self.config.utterance_end_ms
        )
    }
}

#[async_trait]
impl SpeechToText for DeepgramClient {
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

        let mut request = self
            .listen_url()
            .into_client_request()
            .map_err(AgentError::WebSocket)?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|_| AgentError::Config("api key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);

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
                    "UtteranceEnd" => {
                        debug!("utterance end detected");
                        if let Some(callback) = on_utterance_end.read().clone() {
                            callback();
                        }
                    }
                    "Results" => {
                        let Ok(response) = serde_json::from_str::<TranscriptResponse>(&text)
                        else {
                            continue;
                        };
                        let Some(alternative) = response.channel.alternatives.first() else {
                            continue;
                        };
                        if alternative.transcript.is_empty() {
                            continue;
                        }
                        if let Some(callback) = on_transcript.read().clone() {
                            callback(alternative.transcript.clone(), response.is_final);
                        }
                    }
                    _ => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            debug!("deepgram read loop ended");
        });

        *session = Some(Session { tx, cancel });
        info!("connected to Deepgram speech-to-text");
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
        session
            .tx
            .send(WsMessage::Binary(pcm.to_vec()))
            .map_err(|_| AgentError::NotConnected)
    }

    async fn close(&self) -> Result<(), AgentError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        if session
            .tx
            .send(WsMessage::Text(r#"{"type": "CloseStream"}"#.to_string()))
            .is_err()
        {
            warn!("deepgram close message not delivered");
        }
        session.cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);
        info!("disconnected from Deepgram");
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
    fn listen_url_carries_the_audio_parameters() {
        let client = DeepgramClient::new(SttConfig::new("key".into()));
        let url = client.listen_url();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=48000"));
        assert!(url.contains("channels=2"));
        assert!(url.contains("utterance_end_ms=1000"));
    }

    #[test]
    fn transcript_response_parses() {
        let json = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "hello there", "confidence": 0.98}]},
            "is_final": true
        }"#;
        let response: TranscriptResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.channel.alternatives[0].transcript, "hello there");
        assert!(response.is_final);
    }

    #[tokio::test]
    async fn send_audio_requires_a_connection() {
        let client = DeepgramClient::new(SttConfig::new("key".into()));
        assert!(matches!(
            client.send_audio(&[0u8; 4]).await,
            Err(AgentError::NotConnected)
        ));
        assert!(!client.is_connected());
    }
}
