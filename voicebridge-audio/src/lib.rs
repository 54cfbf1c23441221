//! Audio processing for the VoiceBridge publisher path.
//!
//! Converts arbitrary-rate mono PCM (as produced by TTS providers) into
//! 20 ms Opus frames ready for RTP emission at 48 kHz stereo:
//!
//! - [`resample::resample_mono`]: linear-interpolation rate conversion
//! - [`resample::mono_to_stereo`]: channel upmix by duplication
//! - [`codec::OpusEncoder`] / [`codec::OpusDecoder`]: libopus wrappers
//! - [`pipeline::SendPipeline`]: buffering, framing and encoding

mod codec;
mod error;
mod pipeline;
mod resample;

pub use codec::{OpusDecoder, OpusEncoder};
pub use error::AudioError;
pub use pipeline::SendPipeline;
pub use resample::{mono_to_stereo, resample_mono};

/// Sample rate of the WebRTC media plane.
pub const SAMPLE_RATE: u32 = 48_000;

/// Channel count on the media plane (interleaved stereo).
pub const CHANNELS: usize = 2;

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES: usize = 960;

/// Bytes of interleaved stereo s16le PCM in one frame.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

/// Duration of one frame.
pub const FRAME_DURATION: std::time::Duration = std::time::Duration::from_millis(20);

/// Opus bitrate used for voice.
pub const VOICE_BITRATE: i32 = 64_000;
