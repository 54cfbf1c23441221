//! ElevenLabs text-to-speech client.

use serde::Serialize;
use tracing::debug;

use crate::error::AgentError;

const API_URL: &str = "https://api.elevenlabs.io/v1";

/// Rachel, the stock conversational voice.
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_MODEL: &str = "eleven_turbo_v2_5";

/// PCM format requested from the API: 22,050 Hz mono s16le.
pub const OUTPUT_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model: String,
}

impl TtsConfig {
    #[must_use]
    pub fn new(api_key: String, voice_id: Option<String>) -> Self {
        Self {
            api_key,
            voice_id: voice_id
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
    speed: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            speed: 1.0,
        }
    }
}

pub struct ElevenLabsClient {
    config: TtsConfig,
    http: reqwest::Client,
}

impl ElevenLabsClient {
    #[must_use]
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Synthesize `text` and return the full PCM buffer at
    /// [`OUTPUT_SAMPLE_RATE`] mono s16le.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AgentError> {
        // output_format must be a query parameter, not part of the body.
        let url = format!(
            "{API_URL}/text-to-speech/{}?output_format=pcm_22050",
            self.config.voice_id
        );

        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .json(&TtsRequest {
                text,
                model_id: &self.config.model,
                voice_settings: VoiceSettings::default(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let pcm = response.bytes().await?.to_vec();
        debug!(bytes = pcm.len(), "tts synthesis complete");
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_voice_id_falls_back_to_default() {
        let config = TtsConfig::new("key".into(), Some(String::new()));
        assert_eq!(config.voice_id, DEFAULT_VOICE_ID);

        let config = TtsConfig::new("key".into(), Some("custom".into()));
        assert_eq!(config.voice_id, "custom");
    }

    #[test]
    fn request_body_shape() {
        let request = TtsRequest {
            text: "hello",
            model_id: DEFAULT_MODEL,
            voice_settings: VoiceSettings::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["model_id"], "eleven_turbo_v2_5");
        assert_eq!(json["voice_settings"]["stability"], 0.5);
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
    }
}
