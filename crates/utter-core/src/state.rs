//! Capture session state types.

use std::fmt;

/// The current state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, ready for `start()`
    Idle,
    /// Microphone open, encoder running, VAD fed every frame
    Recording,
    /// Stop requested, waiting for the encoder to flush its last data
    Stopping,
    /// Artifact handed to the transcription service
    Transcribing,
    /// The last attempt could not acquire the capture device
    Error,
}

impl SessionState {
    /// A session in this state owns no resources and accepts a new `start()`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Stopping => write!(f, "stopping"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Error => write!(f, "error"),
        }
    }
}
