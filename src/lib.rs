//! sitevoice - Real-time voice conversation core for website assistants
//!
//! This library runs the listen, transcribe, think, speak loop:
//! - Microphone capture with silence-based end-of-utterance detection
//! - Optional live captions while the visitor speaks
//! - Prompt assembly from site content and rolling history
//! - Reply synthesis and playback, then automatic re-listening
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Host UI / CLI                      │
//! │   mic button  │  captions  │  chat bubbles  │  nav   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ EngineHandle
//! ┌────────────────────▼────────────────────────────────┐
//! │               ConversationEngine                     │
//! │   Capture  │  Silence  │  Context  │  Playback       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Speech / completion proxy               │
//! │   transcribe  │  complete  │  synthesize             │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod capability;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod voice;

pub use capability::{Capabilities, Completer, ProxyClient, Synthesizer, Transcriber};
pub use config::Config;
pub use conversation::{
    AssistantReply, ContextAssembler, ConversationHistory, ConversationTurn, Role, SiteContent,
};
pub use engine::{
    ConversationEngine, EngineConfig, EngineHandle, EngineSnapshot, EngineState, HostInterface,
};
pub use error::{Error, ErrorKind, Result};
