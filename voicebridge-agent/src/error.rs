use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("provider not connected")]
    NotConnected,

    #[error("audio error: {0}")]
    Audio(#[from] voicebridge_audio::AudioError),

    #[error(transparent)]
    Client(#[from] voicebridge_client::ClientError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
