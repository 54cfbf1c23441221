//! Synthetic audio for wiring checks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use voicebridge_core::media::OPUS_PAYLOAD_TYPE;

use crate::client::BridgeClient;

/// RTP header length without CSRCs or extensions.
const HEADER_LEN: usize = 12;

/// Opus silence frame: TOC byte for a 20 ms CELT frame plus padding bytes.
const SILENCE_PAYLOAD: [u8; 3] = [0xfc, 0xff, 0xfe];

/// Generates minimal Opus-silence RTP packets so media flow can be verified
/// without a real encoder.
pub struct TestAudioGenerator {
    sequence: u16,
    timestamp: u32,
    frame_samples: u32,
}

impl TestAudioGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: 0,
            timestamp: 0,
            frame_samples: 960,
        }
    }

    /// Produce the next packet: a hand-rolled RTP header followed by an Opus
    /// silence payload.
    pub fn next_frame(&mut self) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LEN + SILENCE_PAYLOAD.len()];

        packet[0] = 0x80; // version 2
        packet[1] = OPUS_PAYLOAD_TYPE;
        packet[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        packet[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        packet[8..12].copy_from_slice(&1u32.to_be_bytes()); // placeholder ssrc
        packet[HEADER_LEN..].copy_from_slice(&SILENCE_PAYLOAD);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.frame_samples);

        packet
    }

    /// Emit one frame every 20 ms until cancelled or the write path fails.
    pub fn spawn(mut self, client: Arc<BridgeClient>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(20));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = self.next_frame();
                        if let Err(err) = client.write_rtp(&frame).await {
                            warn!(error = %err, "test audio write failed");
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl Default for TestAudioGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_contiguous_sequence_numbers() {
        let mut generator = TestAudioGenerator::new();

        let first = generator.next_frame();
        let second = generator.next_frame();

        assert_eq!(first[0], 0x80);
        assert_eq!(first[1], OPUS_PAYLOAD_TYPE);
        assert_eq!(u16::from_be_bytes([first[2], first[3]]), 0);
        assert_eq!(u16::from_be_bytes([second[2], second[3]]), 1);
    }

    #[test]
    fn timestamps_advance_by_one_frame() {
        let mut generator = TestAudioGenerator::new();

        let first = generator.next_frame();
        let second = generator.next_frame();

        let ts = |p: &[u8]| u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
        assert_eq!(ts(&second) - ts(&first), 960);
    }

    #[test]
    fn sequence_wraps_at_sixteen_bits() {
        let mut generator = TestAudioGenerator::new();
        generator.sequence = u16::MAX;

        let last = generator.next_frame();
        let wrapped = generator.next_frame();

        assert_eq!(u16::from_be_bytes([last[2], last[3]]), u16::MAX);
        assert_eq!(u16::from_be_bytes([wrapped[2], wrapped[3]]), 0);
    }
}
