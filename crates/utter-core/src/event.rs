//! Event types shared between the detector, the session engine and callers.
//!
//! These carry no behavior; they exist so the audio, transcription and
//! engine crates agree on what happened without depending on each other.

use std::fmt;

/// Events emitted by the voice activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// First above-threshold frame after a quiet period
    SpeechStarted,
    /// First below-threshold frame after speech
    SilenceStarted,
    /// Silence after speech lasted longer than the configured window
    AutoStopRequested,
}

/// Why a recording left the `Recording` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The detector saw a long enough silence after speech
    AutoStop,
    /// The caller asked to stop
    Manual,
    /// The recording hit the absolute time ceiling
    Failsafe,
    /// The device stopped producing data on its own
    EncoderEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoStop => write!(f, "auto-stop"),
            Self::Manual => write!(f, "manual"),
            Self::Failsafe => write!(f, "failsafe"),
            Self::EncoderEnded => write!(f, "encoder-ended"),
        }
    }
}

/// Errors surfaced to the caller through `on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Permission denied or no input device
    DeviceUnavailable,
    /// The device is held by another session
    DeviceBusy,
    /// The transcription service failed
    Transcription,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceUnavailable => write!(f, "Microphone Access Denied"),
            Self::DeviceBusy => write!(f, "Microphone Busy"),
            Self::Transcription => write!(f, "Transcription Error"),
        }
    }
}

/// Why a finished capture produced no transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSpeechReason {
    /// The transcript came back empty or a single character
    ShortTranscript,
    /// The loudest frame never crossed the speech threshold
    TooQuiet,
    /// Speech never lasted enough consecutive frames
    ShortNoise,
}

impl NoSpeechReason {
    /// A short notice suitable for showing to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ShortTranscript => "We couldn't hear you clearly.",
            Self::TooQuiet => "Please speak closer to the microphone.",
            Self::ShortNoise => "No meaningful speech detected.",
        }
    }
}
