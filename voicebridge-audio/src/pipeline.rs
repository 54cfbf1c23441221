//! Publisher send pipeline: arbitrary-rate mono PCM in, Opus frames out.

use tracing::warn;

use crate::codec::{media_plane_encoder, OpusEncoder};
use crate::error::AudioError;
use crate::resample::{mono_to_stereo, resample_mono};
use crate::{FRAME_BYTES, SAMPLE_RATE};

/// Accumulates 48 kHz stereo PCM and emits one encoded Opus frame per
/// 3,840 buffered bytes (20 ms).
///
/// The pipeline itself does no pacing; callers emit the returned frames on
/// their own 20 ms clock.
pub struct SendPipeline {
    encoder: OpusEncoder,
    input_rate: u32,
    buffer: Vec<u8>,
}

impl SendPipeline {
    /// Create a pipeline for mono s16le input at `input_rate` Hz.
    pub fn new(input_rate: u32) -> Result<Self, AudioError> {
        Ok(Self {
            encoder: media_plane_encoder()?,
            input_rate,
            buffer: Vec::new(),
        })
    }

    /// Feed a chunk of mono PCM and collect every whole frame that becomes
    /// available. A frame that fails to encode is dropped with a warning so
    /// one bad frame cannot end the utterance.
    pub fn process_chunk(&mut self, pcm_mono: &[u8]) -> Result<Vec<Vec<u8>>, AudioError> {
        if pcm_mono.is_empty() {
            return Ok(Vec::new());
        }

        let at_plane_rate = resample_mono(pcm_mono, self.input_rate, SAMPLE_RATE);
        self.buffer.extend_from_slice(&mono_to_stereo(&at_plane_rate));

        Ok(self.drain_whole_frames())
    }

    /// Zero-pad any trailing partial frame to the frame boundary and encode
    /// it. A clean boundary emits nothing.
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let partial = self.buffer.len() % FRAME_BYTES;
        if partial != 0 {
            self.buffer.resize(self.buffer.len() + (FRAME_BYTES - partial), 0);
        }
        self.drain_whole_frames()
    }

    /// Discard buffered PCM without emitting. Used when an utterance is
    /// interrupted so the next one starts clean.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes currently waiting for a frame boundary.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn drain_whole_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(self.buffer.len() / FRAME_BYTES);
        let mut offset = 0;

        while self.buffer.len() - offset >= FRAME_BYTES {
            let frame = &self.buffer[offset..offset + FRAME_BYTES];
            match self.encoder.encode_bytes(frame) {
                Ok(opus) => frames.push(opus),
                Err(err) => warn!(error = %err, "dropping unencodable frame"),
            }
            offset += FRAME_BYTES;
        }
        self.buffer.drain(..offset);

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_of_tts_audio_yields_fifty_frames() {
        // 22,050 mono samples at 22,050 Hz is one second, i.e. 50 frames of
        // 20 ms once resampled to the 48 kHz stereo plane.
        let mut pipeline = SendPipeline::new(22_050).unwrap();
        let pcm = vec![0u8; 22_050 * 2];

        let mut frames = pipeline.process_chunk(&pcm).unwrap();
        frames.extend(pipeline.flush());

        assert_eq!(frames.len(), 50);
        assert!(frames.iter().all(|f| !f.is_empty()));
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn short_chunk_stays_buffered_until_flush() {
        let mut pipeline = SendPipeline::new(48_000).unwrap();
        // Half a frame of mono input (480 samples -> 1,920 stereo bytes).
        let pcm = vec![0u8; 480 * 2];

        let frames = pipeline.process_chunk(&pcm).unwrap();
        assert!(frames.is_empty());
        assert_eq!(pipeline.buffered(), 1920);

        let flushed = pipeline.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn flush_then_reset_emits_at_most_one_frame() {
        let mut pipeline = SendPipeline::new(48_000).unwrap();
        pipeline.process_chunk(&vec![0u8; 100]).unwrap();

        let flushed = pipeline.flush();
        assert!(flushed.len() <= 1);

        pipeline.reset();
        assert!(pipeline.flush().is_empty());
    }

    #[test]
    fn reset_discards_buffered_audio() {
        let mut pipeline = SendPipeline::new(48_000).unwrap();
        pipeline.process_chunk(&vec![0u8; 1000]).unwrap();
        assert!(pipeline.buffered() > 0);

        pipeline.reset();
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn identity_rate_input_passes_through_unresampled() {
        // 960 mono samples at 48 kHz become exactly one stereo frame.
        let mut pipeline = SendPipeline::new(48_000).unwrap();
        let frames = pipeline.process_chunk(&vec![0u8; 960 * 2]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(pipeline.buffered(), 0);
    }
}
