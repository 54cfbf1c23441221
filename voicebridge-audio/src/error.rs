use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("opus codec error: {0}")]
    Codec(#[from] opus::Error),

    #[error("invalid pcm length: {0} bytes is not a whole number of samples")]
    InvalidPcmLength(usize),
}
