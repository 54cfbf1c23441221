//! OpenAI chat client with SSE streaming and conversation memory.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AgentError;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Text model, cost-optimized.
    pub model: String,
    /// Model used automatically when a screenshot is attached.
    pub vision_model: String,
    pub system_prompt: String,
}

impl LlmConfig {
    #[must_use]
    pub fn new(api_key: String, system_prompt: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            system_prompt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: String,
}

pub struct OpenAiClient {
    config: LlmConfig,
    http: reqwest::Client,
    /// User/assistant turns; the system prompt is prepended per request.
    history: Mutex<Vec<ChatMessage>>,
}

impl OpenAiClient {
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Stream a reply to `user_message`, invoking `on_chunk` per delta.
    /// Returns the full reply; cancellation aborts the in-flight read and
    /// surfaces [`AgentError::Cancelled`].
    pub async fn chat_stream(
        &self,
        cancel: &CancellationToken,
        user_message: &str,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, AgentError> {
        let messages = {
            let mut history = self.history.lock().await;
            history.push(ChatMessage {
                role: "user".to_string(),
                content: user_message.to_string(),
            });
            self.build_messages(&history)
        };

        self.run_stream(&self.config.model, messages, cancel, on_chunk)
            .await
    }

    /// Like [`chat_stream`](Self::chat_stream) but attaches a base64 JPEG
    /// and switches to the vision model. The image itself is not kept in
    /// history, only a text placeholder.
    pub async fn chat_stream_with_image(
        &self,
        cancel: &CancellationToken,
        user_message: &str,
        image_base64: &str,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, AgentError> {
        let messages = {
            let mut history = self.history.lock().await;
            history.push(ChatMessage {
                role: "user".to_string(),
                content: format!("{user_message} [with screenshot]"),
            });
            // History without the placeholder we just appended, then the
            // real vision message.
            let prior = &history[..history.len() - 1];
            let mut messages = self.build_messages(prior);
            messages.push(json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": user_message },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/jpeg;base64,{image_base64}"),
                            "detail": "low"
                        }
                    }
                ]
            }));
            messages
        };

        self.run_stream(&self.config.vision_model, messages, cancel, on_chunk)
            .await
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    fn build_messages(&self, history: &[ChatMessage]) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(json!({
            "role": "system",
            "content": self.config.system_prompt,
        }));
        for msg in history {
            messages.push(json!({ "role": msg.role, "content": msg.content }));
        }
        messages
    }

    async fn run_stream(
        &self,
        model: &str,
        messages: Vec<serde_json::Value>,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, AgentError> {
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            response = self
                .http
                .post(API_URL)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut full_response = String::new();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            line_buffer.push_str(&String::from_utf8_lossy(&chunk?));

            while let Some(newline) = line_buffer.find('\n') {
                let line: String = line_buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'read;
                }
                let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) else {
                    continue;
                };
                if let Some(choice) = parsed.choices.first() {
                    if !choice.delta.content.is_empty() {
                        full_response.push_str(&choice.delta.content);
                        on_chunk(&choice.delta.content);
                    }
                }
            }
        }

        debug!(chars = full_response.len(), "llm stream complete");

        if !full_response.is_empty() {
            self.history.lock().await.push(ChatMessage {
                role: "assistant".to_string(),
                content: full_response.clone(),
            });
        }

        Ok(full_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_chunk_parses_delta_content() {
        let json = r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].delta.content, "Hi");
    }

    #[test]
    fn final_chunk_has_empty_delta() {
        let json = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let parsed: StreamResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.choices[0].delta.content.is_empty());
    }

    #[tokio::test]
    async fn messages_start_with_the_system_prompt() {
        let client = OpenAiClient::new(LlmConfig::new("key".into(), "be brief".into()));
        client.history.lock().await.push(ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        });
        let history = client.history.lock().await;
        let messages = client.build_messages(&history);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[1]["role"], "user");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_sending() {
        let client = OpenAiClient::new(LlmConfig::new("key".into(), "prompt".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.chat_stream(&cancel, "hello", &mut |_| {}).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
