//! Outbound peer for programmatic participants (bots, agents, tools).
//!
//! A [`BridgeClient`] joins a room over the bridge's signaling channel,
//! publishes one Opus track, and surfaces remote tracks, peer events and
//! screenshots through registered handlers.

mod client;
mod error;
mod generator;

pub use client::{AudioHandler, BridgeClient, PeerEventHandler, ScreenshotHandler};
pub use error::ClientError;
pub use generator::TestAudioGenerator;
