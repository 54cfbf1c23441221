//! Speech-to-text providers.
//!
//! Both providers speak a streaming WebSocket protocol: PCM goes up as
//! binary frames, transcripts come back as JSON. The capability surface is
//! identical, so the agent picks one at startup by which credential is
//! present and talks to it through [`SpeechToText`].

mod assemblyai;
mod deepgram;

pub use assemblyai::AssemblyAiClient;
pub use deepgram::DeepgramClient;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AgentError;

/// Called with `(transcript, is_final)` for each recognition result.
pub type TranscriptCallback = Arc<dyn Fn(String, bool) + Send + Sync>;

/// Called when the provider detects the speaker has finished.
pub type UtteranceEndCallback = Arc<dyn Fn() + Send + Sync>;

/// Streaming transcription capability. Callbacks must be registered before
/// `connect`; they are invoked from the provider's read task.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn on_transcript(&self, callback: TranscriptCallback);
    fn on_utterance_end(&self, callback: UtteranceEndCallback);

    async fn connect(&self) -> Result<(), AgentError>;

    /// Stream a chunk of PCM (s16le at the configured rate and channels).
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), AgentError>;

    async fn close(&self) -> Result<(), AgentError>;

    fn is_connected(&self) -> bool;
}

/// Common connection settings for STT providers.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    /// Input sample rate of the PCM handed to `send_audio`.
    pub sample_rate: u32,
    pub channels: u16,
    /// Silence window before the provider reports utterance end.
    pub utterance_end_ms: u32,
}

impl SttConfig {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            sample_rate: 48_000,
            channels: 2,
            utterance_end_ms: 1_000,
        }
    }
}
