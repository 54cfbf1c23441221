//! Thin wrappers around libopus for the 48 kHz stereo media plane.

use crate::error::AudioError;
use crate::{SAMPLE_RATE, VOICE_BITRATE};

/// Maximum compressed size of a single Opus frame we ever produce.
const MAX_PACKET: usize = 1024;

/// Opus can carry frames up to 60 ms; at 48 kHz that is 2880 samples per
/// channel, so a decode buffer of 5760 per channel covers every legal frame.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Encoder producing VoIP-tuned Opus from interleaved s16le PCM.
pub struct OpusEncoder {
    encoder: opus::Encoder,
    channels: usize,
}

impl OpusEncoder {
    /// Create an encoder at the given rate and channel count, configured for
    /// voice at 64 kbit/s.
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self, AudioError> {
        let ch = if channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let mut encoder = opus::Encoder::new(sample_rate, ch, opus::Application::Voip)?;
        encoder.set_bitrate(opus::Bitrate::Bits(VOICE_BITRATE))?;
        Ok(Self { encoder, channels })
    }

    /// Encode one frame of interleaved i16 samples.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        Ok(self.encoder.encode_vec(pcm, MAX_PACKET)?)
    }

    /// Encode one frame of interleaved s16le PCM bytes.
    pub fn encode_bytes(&mut self, pcm: &[u8]) -> Result<Vec<u8>, AudioError> {
        if pcm.len() % 2 != 0 {
            return Err(AudioError::InvalidPcmLength(pcm.len()));
        }
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.encode(&samples)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Decoder for Opus payloads arriving on remote tracks.
pub struct OpusDecoder {
    decoder: opus::Decoder,
    channels: usize,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self, AudioError> {
        let ch = if channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        Ok(Self {
            decoder: opus::Decoder::new(sample_rate, ch)?,
            channels,
        })
    }

    /// Decode an Opus packet to interleaved i16 samples.
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
        let mut pcm = vec![0i16; MAX_FRAME_SAMPLES * self.channels];
        let samples_per_channel = self.decoder.decode(packet, &mut pcm, false)?;
        pcm.truncate(samples_per_channel * self.channels);
        Ok(pcm)
    }

    /// Decode an Opus packet to interleaved s16le PCM bytes.
    pub fn decode_to_bytes(&mut self, packet: &[u8]) -> Result<Vec<u8>, AudioError> {
        let pcm = self.decode(packet)?;
        Ok(pcm.iter().flat_map(|s| s.to_le_bytes()).collect())
    }
}

/// Encoder at the media-plane defaults (48 kHz stereo).
pub fn media_plane_encoder() -> Result<OpusEncoder, AudioError> {
    OpusEncoder::new(SAMPLE_RATE, crate::CHANNELS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CHANNELS, FRAME_SAMPLES};

    #[test]
    fn encode_decode_round_trips_a_frame() {
        let mut enc = media_plane_encoder().unwrap();
        let mut dec = OpusDecoder::new(SAMPLE_RATE, CHANNELS).unwrap();

        let pcm = vec![0i16; FRAME_SAMPLES * CHANNELS];
        let packet = enc.encode(&pcm).unwrap();
        assert!(!packet.is_empty());

        let decoded = dec.decode(&packet).unwrap();
        assert_eq!(decoded.len(), FRAME_SAMPLES * CHANNELS);
    }

    #[test]
    fn encode_bytes_rejects_odd_length() {
        let mut enc = media_plane_encoder().unwrap();
        assert!(matches!(
            enc.encode_bytes(&[0u8; 3]),
            Err(AudioError::InvalidPcmLength(3))
        ));
    }
}
