//! A voice AI agent for VoiceBridge rooms.
//!
//! The agent joins a room as an ordinary peer, transcribes what it hears
//! through a speech-to-text provider, feeds finished utterances to an LLM,
//! and speaks the reply back into the room through the audio send pipeline.
//! A transcript arriving mid-reply interrupts the reply.

pub mod agent;
pub mod error;
pub mod llm;
pub mod persona;
pub mod stt;
pub mod tts;

pub use agent::{Agent, AgentConfig};
pub use error::AgentError;
pub use persona::{Persona, PersonaConfig};
