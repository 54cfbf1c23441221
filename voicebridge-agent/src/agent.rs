//! Agent orchestration: listen, transcribe, think, speak.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::MarshalSize;

use voicebridge_audio::{OpusDecoder, SendPipeline, CHANNELS, FRAME_DURATION, SAMPLE_RATE};
use voicebridge_client::BridgeClient;
use voicebridge_core::PeerId;

use crate::error::AgentError;
use crate::llm::{LlmConfig, OpenAiClient};
use crate::persona::{with_screen_hint, Persona};
use crate::stt::{AssemblyAiClient, DeepgramClient, SpeechToText, SttConfig};
use crate::tts::{ElevenLabsClient, TtsConfig, OUTPUT_SAMPLE_RATE};

/// Which transcription service to talk to, decided at startup by which
/// credential is present. AssemblyAI wins when both are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SttProvider {
    Deepgram,
    AssemblyAi,
}

pub struct AgentConfig {
    pub id: String,
    pub server_url: String,
    pub deepgram_api_key: String,
    pub assemblyai_api_key: String,
    pub openai_api_key: String,
    pub elevenlabs_api_key: String,
    pub persona: Persona,
}

#[derive(Default)]
struct TranscriptState {
    pending: String,
    processing_llm: bool,
}

#[derive(Default)]
struct SpeakingState {
    speak_cancel: Option<CancellationToken>,
    llm_cancel: Option<CancellationToken>,
}

#[derive(Clone)]
struct Screenshot {
    from: PeerId,
    data: String,
}

/// A voice agent participating in one room.
pub struct Agent {
    id: PeerId,
    persona_name: String,
    client: Arc<BridgeClient>,

    stt_provider: Option<SttProvider>,
    deepgram_api_key: String,
    assemblyai_api_key: String,
    stt: tokio::sync::Mutex<Option<Arc<dyn SpeechToText>>>,

    llm: Option<Arc<OpenAiClient>>,
    tts: Option<Arc<ElevenLabsClient>>,
    pipeline: Option<tokio::sync::Mutex<SendPipeline>>,

    decoders: Mutex<HashMap<PeerId, Arc<Mutex<OpusDecoder>>>>,
    active_peers: RwLock<HashSet<PeerId>>,

    audio_received: AtomicU64,
    audio_sent: AtomicU64,

    transcript: Mutex<TranscriptState>,
    speaking: Mutex<SpeakingState>,
    latest_screenshot: Mutex<Option<Screenshot>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Arc<Self>, AgentError> {
        let stt_provider = if !config.assemblyai_api_key.is_empty() {
            Some(SttProvider::AssemblyAi)
        } else if !config.deepgram_api_key.is_empty() {
            Some(SttProvider::Deepgram)
        } else {
            None
        };

        let llm = if config.openai_api_key.is_empty() {
            None
        } else {
            Some(Arc::new(OpenAiClient::new(LlmConfig::new(
                config.openai_api_key,
                with_screen_hint(&config.persona.prompt),
            ))))
        };

        let (tts, pipeline) = if config.elevenlabs_api_key.is_empty() {
            (None, None)
        } else {
            let tts = Arc::new(ElevenLabsClient::new(TtsConfig::new(
                config.elevenlabs_api_key,
                Some(config.persona.voice_id.clone()),
            )));
            let pipeline = SendPipeline::new(OUTPUT_SAMPLE_RATE)?;
            (Some(tts), Some(tokio::sync::Mutex::new(pipeline)))
        };

        Ok(Arc::new(Self {
            id: PeerId::from(config.id.as_str()),
            persona_name: config.persona.name,
            client: BridgeClient::new(config.id.as_str(), config.server_url),
            stt_provider,
            deepgram_api_key: config.deepgram_api_key,
            assemblyai_api_key: config.assemblyai_api_key,
            stt: tokio::sync::Mutex::new(None),
            llm,
            tts,
            pipeline,
            decoders: Mutex::new(HashMap::new()),
            active_peers: RwLock::new(HashSet::new()),
            audio_received: AtomicU64::new(0),
            audio_sent: AtomicU64::new(0),
            transcript: Mutex::new(TranscriptState::default()),
            speaking: Mutex::new(SpeakingState::default()),
            latest_screenshot: Mutex::new(None),
        }))
    }

    #[must_use]
    pub fn client(&self) -> &Arc<BridgeClient> {
        &self.client
    }

    /// Register bridge callbacks and join `room`.
    pub async fn start(self: &Arc<Self>, room: &str) -> Result<(), AgentError> {
        let weak = Arc::downgrade(self);
        self.client.on_audio_received(Arc::new(move |peer_id, track| {
            let Some(agent) = weak.upgrade() else { return };
            tokio::spawn(async move {
                agent.handle_incoming_audio(peer_id, track).await;
            });
        }));

        let weak = Arc::downgrade(self);
        self.client.on_peer_event(Arc::new(move |peer_id, joined| {
            let Some(agent) = weak.upgrade() else { return };
            let total = {
                let mut peers = agent.active_peers.write();
                if joined {
                    peers.insert(peer_id.clone());
                } else {
                    peers.remove(&peer_id);
                }
                peers.len()
            };
            info!(agent = %agent.id, peer = %peer_id, joined, total, "peer event");
        }));

        let weak = Arc::downgrade(self);
        self.client
            .on_screenshot_received(Arc::new(move |peer_id, data| {
                let Some(agent) = weak.upgrade() else { return };
                info!(agent = %agent.id, from = %peer_id, bytes = data.len(), "screenshot received");
                *agent.latest_screenshot.lock() = Some(Screenshot {
                    from: peer_id,
                    data,
                });
            }));

        self.client.connect(room).await?;
        info!(agent = %self.id, room, persona = %self.persona_name, "agent started");
        Ok(())
    }

    /// Decode a publisher's audio and stream it to the STT provider.
    async fn handle_incoming_audio(self: Arc<Self>, peer_id: PeerId, track: Arc<TrackRemote>) {
        info!(agent = %self.id, publisher = %peer_id, "processing audio stream");

        if let Err(err) = self.ensure_stt_connected().await {
            warn!(agent = %self.id, error = %err, "speech-to-text unavailable");
        }

        let decoder = match self.decoder_for(&peer_id) {
            Ok(decoder) => decoder,
            Err(err) => {
                warn!(agent = %self.id, publisher = %peer_id, error = %err, "decoder setup failed");
                return;
            }
        };

        loop {
            let packet = match track.read_rtp().await {
                Ok((packet, _attrs)) => packet,
                Err(err) => {
                    debug!(agent = %self.id, publisher = %peer_id, error = %err, "audio stream ended");
                    return;
                }
            };

            let wire_bytes = packet.header.marshal_size() + packet.payload.len();
            self.audio_received
                .fetch_add(wire_bytes as u64, Ordering::Relaxed);

            if packet.payload.is_empty() {
                continue;
            }

            let pcm = match decoder.lock().decode_to_bytes(&packet.payload) {
                Ok(pcm) => pcm,
                Err(_) => continue,
            };

            let stt = self.stt.lock().await.clone();
            if let Some(stt) = stt.filter(|s| s.is_connected()) {
                if let Err(err) = stt.send_audio(&pcm).await {
                    warn!(agent = %self.id, error = %err, "stt send failed");
                }
            }
        }
    }

    fn decoder_for(&self, peer_id: &PeerId) -> Result<Arc<Mutex<OpusDecoder>>, AgentError> {
        let mut decoders = self.decoders.lock();
        if let Some(decoder) = decoders.get(peer_id) {
            return Ok(decoder.clone());
        }
        let decoder = Arc::new(Mutex::new(OpusDecoder::new(SAMPLE_RATE, CHANNELS)?));
        decoders.insert(peer_id.clone(), decoder.clone());
        Ok(decoder)
    }

    /// Connect the configured STT provider if it is not already up.
    async fn ensure_stt_connected(self: &Arc<Self>) -> Result<(), AgentError> {
        let Some(provider) = self.stt_provider else {
            return Ok(());
        };

        let mut slot = self.stt.lock().await;
        if let Some(stt) = slot.as_ref() {
            if stt.is_connected() {
                return Ok(());
            }
        }

        let stt: Arc<dyn SpeechToText> = match provider {
            SttProvider::Deepgram => Arc::new(DeepgramClient::new(SttConfig::new(
                self.deepgram_api_key.clone(),
            ))),
            SttProvider::AssemblyAi => Arc::new(AssemblyAiClient::new(SttConfig::new(
                self.assemblyai_api_key.clone(),
            ))),
        };

        let weak = Arc::downgrade(self);
        stt.on_transcript(Arc::new(move |transcript, is_final| {
            if let Some(agent) = weak.upgrade() {
                agent.handle_transcript(&transcript, is_final);
            }
        }));

        let weak = Arc::downgrade(self);
        stt.on_utterance_end(Arc::new(move || {
            if let Some(agent) = weak.upgrade() {
                agent.handle_utterance_end();
            }
        }));

        stt.connect().await?;
        info!(agent = %self.id, provider = ?provider, "speech-to-text connected");
        *slot = Some(stt);
        Ok(())
    }

    /// Accumulate final transcripts; any speech heard while the agent is
    /// talking interrupts the reply.
    fn handle_transcript(self: &Arc<Self>, transcript: &str, is_final: bool) {
        if !transcript.is_empty() && self.is_speaking() {
            info!(agent = %self.id, transcript, "interruption detected");
            self.interrupt();
        }

        debug!(agent = %self.id, transcript, is_final, "transcript");

        if is_final && !transcript.is_empty() {
            let mut state = self.transcript.lock();
            if !state.pending.is_empty() {
                state.pending.push(' ');
            }
            state.pending.push_str(transcript);
        }
    }

    /// The user stopped talking: hand the accumulated utterance to the LLM,
    /// unless one is already being processed.
    fn handle_utterance_end(self: &Arc<Self>) {
        let utterance = {
            let mut state = self.transcript.lock();
            if state.pending.is_empty() || state.processing_llm {
                return;
            }
            state.processing_llm = true;
            std::mem::take(&mut state.pending)
        };

        info!(agent = %self.id, utterance, "utterance complete, processing");
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.process_with_llm(utterance).await;
        });
    }

    fn is_speaking(&self) -> bool {
        self.speaking.lock().speak_cancel.is_some()
    }

    /// Stop the current reply: cancel TTS playback at the next frame tick
    /// and abort the in-flight LLM request.
    fn interrupt(&self) {
        let state = self.speaking.lock();
        if let Some(cancel) = &state.speak_cancel {
            cancel.cancel();
        }
        if let Some(cancel) = &state.llm_cancel {
            cancel.cancel();
        }
    }

    async fn process_with_llm(self: Arc<Self>, utterance: String) {
        let outcome = self.run_llm_turn(&utterance).await;

        {
            let mut speaking = self.speaking.lock();
            speaking.llm_cancel = None;
        }
        self.transcript.lock().processing_llm = false;

        match outcome {
            Ok(Some(response)) => {
                if let Err(err) = self.speak(&response).await {
                    warn!(agent = %self.id, error = %err, "failed to speak response");
                }
            }
            Ok(None) => {}
            Err(AgentError::Cancelled) => {
                info!(agent = %self.id, "llm request cancelled (interrupted)");
            }
            Err(err) => warn!(agent = %self.id, error = %err, "llm request failed"),
        }
    }

    async fn run_llm_turn(&self, utterance: &str) -> Result<Option<String>, AgentError> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let cancel = CancellationToken::new();
        self.speaking.lock().llm_cancel = Some(cancel.clone());

        info!(agent = %self.id, user = utterance, "sending to llm");

        let screenshot = self.latest_screenshot.lock().clone();
        let with_image = screenshot
            .as_ref()
            .filter(|_| wants_screen_context(utterance));

        let response = match with_image {
            Some(shot) => {
                info!(agent = %self.id, from = %shot.from, "including screenshot in llm request");
                llm.chat_stream_with_image(&cancel, utterance, &shot.data, &mut |_| {})
                    .await?
            }
            None => llm.chat_stream(&cancel, utterance, &mut |_| {}).await?,
        };

        if response.is_empty() {
            return Ok(None);
        }
        info!(agent = %self.id, assistant = %response, "llm response");
        Ok(Some(response))
    }

    /// Synthesize `text` and pace it into the room, one Opus frame per
    /// 20 ms. Cancellation stops emission at the next tick; frames already
    /// sent cannot be recalled.
    async fn speak(&self, text: &str) -> Result<(), AgentError> {
        let (Some(tts), Some(pipeline)) = (&self.tts, &self.pipeline) else {
            return Ok(());
        };

        let cancel = CancellationToken::new();
        self.speaking.lock().speak_cancel = Some(cancel.clone());

        let result = self.speak_frames(tts, pipeline, &cancel, text).await;

        self.speaking.lock().speak_cancel = None;
        result
    }

    async fn speak_frames(
        &self,
        tts: &Arc<ElevenLabsClient>,
        pipeline: &tokio::sync::Mutex<SendPipeline>,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<(), AgentError> {
        let frames = {
            let mut pipeline = pipeline.lock().await;
            pipeline.reset();
            let pcm = tts.synthesize(text).await?;
            debug!(agent = %self.id, bytes = pcm.len(), "tts pcm received");

            let mut frames = pipeline.process_chunk(&pcm)?;
            frames.extend(pipeline.flush());
            frames
        };

        let seconds = frames.len() as f64 * FRAME_DURATION.as_secs_f64();
        info!(agent = %self.id, frames = frames.len(), seconds, "speaking response");

        let mut ticker = tokio::time::interval(FRAME_DURATION);
        // Dropping a frame beats emitting two inside one 20 ms window.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        for (index, frame) in frames.iter().enumerate() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(agent = %self.id, frame = index, total = frames.len(), "speech interrupted");
                    pipeline.lock().await.reset();
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.client.write_opus(frame).await?;
            self.audio_sent
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
        }

        info!(agent = %self.id, "finished speaking");
        Ok(())
    }

    /// `(bytes received, bytes sent, active peers)`.
    #[must_use]
    pub fn stats(&self) -> (u64, u64, usize) {
        (
            self.audio_received.load(Ordering::Relaxed),
            self.audio_sent.load(Ordering::Relaxed),
            self.active_peers.read().len(),
        )
    }

    /// Disconnect from the STT provider and the bridge.
    pub async fn stop(&self) {
        if let Some(stt) = self.stt.lock().await.take() {
            if let Err(err) = stt.close().await {
                warn!(agent = %self.id, error = %err, "stt close failed");
            }
        }
        if let Err(err) = self.client.disconnect().await {
            warn!(agent = %self.id, error = %err, "bridge disconnect failed");
        }
        info!(agent = %self.id, "agent stopped");
    }
}

/// Words suggesting the user is talking about what is on their screen.
const SCREEN_KEYWORDS: &[&str] = &[
    "screen",
    "display",
    "showing",
    "see",
    "look",
    "looking",
    "watch",
    "watching",
    "view",
    "viewing",
    "monitor",
    "window",
    "browser",
    "app",
    "application",
    "what's this",
    "what is this",
    "what's that",
    "what is that",
    "show me",
    "tell me about",
    "describe",
];

fn wants_screen_context(transcript: &str) -> bool {
    let lower = transcript.to_lowercase();
    SCREEN_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_persona() -> Persona {
        Persona {
            name: "Test".into(),
            prompt: "You are a test agent.".into(),
            ..Default::default()
        }
    }

    fn test_agent(deepgram: &str, assemblyai: &str) -> Arc<Agent> {
        Agent::new(AgentConfig {
            id: "agent".into(),
            server_url: "ws://localhost:8080/ws".into(),
            deepgram_api_key: deepgram.into(),
            assemblyai_api_key: assemblyai.into(),
            openai_api_key: String::new(),
            elevenlabs_api_key: String::new(),
            persona: test_persona(),
        })
        .unwrap()
    }

    #[test]
    fn screen_keywords_are_detected() {
        assert!(wants_screen_context("What is on my screen right now?"));
        assert!(wants_screen_context("LOOK at this"));
        assert!(!wants_screen_context("How is the weather?"));
    }

    #[test]
    fn assemblyai_wins_when_both_keys_are_present() {
        let agent = test_agent("dg-key", "aai-key");
        assert_eq!(agent.stt_provider, Some(SttProvider::AssemblyAi));

        let agent = test_agent("dg-key", "");
        assert_eq!(agent.stt_provider, Some(SttProvider::Deepgram));

        let agent = test_agent("", "");
        assert_eq!(agent.stt_provider, None);
    }

    #[test]
    fn final_transcripts_accumulate_space_joined() {
        let agent = test_agent("", "");
        agent.handle_transcript("hello", true);
        agent.handle_transcript("ignored interim", false);
        agent.handle_transcript("world", true);
        assert_eq!(agent.transcript.lock().pending, "hello world");
    }

    #[tokio::test]
    async fn utterance_end_without_pending_text_is_a_no_op() {
        let agent = test_agent("", "");
        agent.handle_utterance_end();
        assert!(!agent.transcript.lock().processing_llm);
    }

    #[tokio::test]
    async fn utterance_end_claims_the_pending_transcript() {
        let agent = test_agent("", "");
        agent.handle_transcript("hi there", true);
        agent.handle_utterance_end();

        let state = agent.transcript.lock();
        assert!(state.pending.is_empty());
        // No LLM configured: the spawned turn clears the flag quickly, so
        // only the claim itself is asserted here.
    }

    #[test]
    fn interrupt_cancels_active_speech() {
        let agent = test_agent("", "");
        let cancel = CancellationToken::new();
        agent.speaking.lock().speak_cancel = Some(cancel.clone());

        assert!(agent.is_speaking());
        agent.interrupt();
        assert!(cancel.is_cancelled());
    }
}
