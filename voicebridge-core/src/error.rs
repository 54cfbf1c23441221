use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("peer {0} is gone")]
    PeerGone(crate::types::PeerId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
