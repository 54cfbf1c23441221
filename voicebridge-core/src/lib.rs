//! VoiceBridge SFU core.
//!
//! A selective forwarding unit for audio conferencing: each participant
//! publishes one Opus track over a WebRTC session and receives the tracks of
//! every other participant in the same room. Signaling runs over a JSON
//! WebSocket channel; screenshots ride the same channel out-of-band from the
//! media plane.
//!
//! ## Architecture
//!
//! - [`Room`] / [`RoomRegistry`]: peer membership and room lookup
//! - [`Peer`]: per-participant signaling socket and media session
//! - [`SfuController`]: join/leave orchestration, track wiring,
//!   renegotiation
//! - [`server`]: axum surface exposing `/ws` and `/health`
//! - `forward`: per-track RTP copy loops

pub mod config;
pub mod error;
pub mod forward;
pub mod media;
pub mod peer;
pub mod registry;
pub mod room;
pub mod server;
pub mod sfu;
pub mod signal;
pub mod types;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use peer::Peer;
pub use registry::RoomRegistry;
pub use room::Room;
pub use sfu::SfuController;
pub use signal::SignalMessage;
pub use types::{PeerId, RoomId};
