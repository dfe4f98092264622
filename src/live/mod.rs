//! Live bidirectional audio session
//!
//! Voice mode runs one realtime session against the provider's WebSocket
//! endpoint: microphone chunks stream up, synthesized audio and caption
//! fragments stream down. The provider owns turn-taking and interruption
//! detection; this module owns the session lifecycle and the ordered
//! dispatch of server events to playback and the transcript buffers.
//!
//! # Lifecycle
//!
//! `Idle -> Opening -> Open -> Closing -> Idle`, with a failure during
//! `Opening` or `Open` tearing everything down and returning to `Idle`.
//! At most one session is active per process; a second `start()` while one
//! is open is rejected.

mod protocol;
mod session;
mod transcript;

pub use protocol::{ClientMessage, ServerContent, ServerEvent};
pub use session::{LiveSession, SessionState, SessionUpdate};
pub use transcript::TurnTranscripts;

use crate::audio::AudioError;

/// Errors that can occur while opening or running a live session
#[derive(Debug, Clone)]
pub enum LiveError {
    /// API key not configured
    MissingApiKey,
    /// Another live session is already open
    SessionActive,
    /// Microphone or speaker failure
    Audio(AudioError),
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// The provider rejected or never acknowledged the session setup
    SetupFailed(String),
    /// The connection failed after the session was open
    Transport(String),
}

impl std::fmt::Display for LiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveError::MissingApiKey => {
                write!(f, "API key not configured. Set GEMINI_API_KEY.")
            }
            LiveError::SessionActive => {
                write!(f, "A live session is already active; stop it first")
            }
            LiveError::Audio(e) => write!(f, "Audio device error: {}", e),
            LiveError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to the live endpoint: {}", e)
            }
            LiveError::SetupFailed(e) => write!(f, "Session setup failed: {}", e),
            LiveError::Transport(e) => write!(f, "Live session connection lost: {}", e),
        }
    }
}

impl std::error::Error for LiveError {}

impl From<AudioError> for LiveError {
    fn from(e: AudioError) -> Self {
        LiveError::Audio(e)
    }
}
