//! Transcription backend library for utter.
//!
//! This crate provides a trait-based abstraction for the speech-to-text
//! service, an implementation for OpenAI's transcription API, and the
//! one-shot handoff that validates what comes back.

mod handoff;
mod openai;

use async_trait::async_trait;
pub use bytes::Bytes;
pub use handoff::{HandoffOutcome, MIN_TRANSCRIPT_CHARS, TranscriptionHandoff};
pub use openai::{OpenAIClient, OpenAIConfig};
use thiserror::Error;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Trait for transcription backends.
///
/// Implement this trait to add new transcription backends (other cloud
/// providers, a local model, a test double).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to text.
    ///
    /// # Arguments
    /// * `audio` - Encoded audio as reference-counted bytes.
    /// * `mime_type` - Encoding tag of `audio`, e.g. "audio/wav"
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> Result<String>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}
