//! One-shot delegation of a finished artifact to a transcriber.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use utter_core::AudioArtifact;

use crate::{TranscribeError, Transcriber};

/// Transcripts shorter than this (after trimming) count as no speech.
pub const MIN_TRANSCRIPT_CHARS: usize = 2;

/// What a single handoff produced.
#[derive(Debug)]
pub enum HandoffOutcome {
    /// Usable text, trimmed
    Transcript(String),
    /// The service answered with nothing meaningful
    NoSpeech,
    /// The service failed; the cause is kept for logging
    Failed(TranscribeError),
}

/// Sends each artifact to the transcriber exactly once.
#[derive(Clone)]
pub struct TranscriptionHandoff {
    transcriber: Arc<dyn Transcriber>,
}

impl TranscriptionHandoff {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }

    pub fn transcriber_name(&self) -> &str {
        self.transcriber.name()
    }

    /// Transcribe `artifact` and classify the result. Never retries.
    pub async fn run(&self, artifact: AudioArtifact) -> HandoffOutcome {
        if artifact.is_empty() {
            warn!(backend = self.transcriber.name(), "refusing to transcribe empty audio");
            return HandoffOutcome::NoSpeech;
        }
        let bytes = artifact.len();
        let mime_type = artifact.mime_type().to_owned();
        let before = Instant::now();

        let result = self
            .transcriber
            .transcribe(artifact.into_data(), &mime_type)
            .await;
        let duration = before.elapsed();

        match result {
            Ok(text) => {
                let text = text.trim();
                info!(
                    backend = self.transcriber.name(),
                    bytes,
                    duration = ?duration,
                    chars = text.chars().count(),
                    "transcription completed"
                );
                if text.chars().count() < MIN_TRANSCRIPT_CHARS {
                    HandoffOutcome::NoSpeech
                } else {
                    HandoffOutcome::Transcript(text.to_owned())
                }
            }
            Err(error) => {
                warn!(
                    backend = self.transcriber.name(),
                    bytes,
                    error = %error,
                    "transcription failed"
                );
                HandoffOutcome::Failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::Result;

    struct Scripted {
        reply: Mutex<Option<Result<String>>>,
        calls: AtomicUsize,
        seen_mime: Mutex<Option<String>>,
    }

    impl Scripted {
        fn new(reply: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                calls: AtomicUsize::new(0),
                seen_mime: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Transcriber for Scripted {
        async fn transcribe(&self, _audio: Bytes, mime_type: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_mime.lock() = Some(mime_type.to_owned());
            self.reply
                .lock()
                .take()
                .unwrap_or_else(|| Err(TranscribeError::TranscriptionFailed("called twice".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn artifact() -> AudioArtifact {
        AudioArtifact::new(vec![0u8; 64], "audio/webm")
    }

    #[tokio::test]
    async fn trivial_transcripts_are_no_speech() {
        for text in ["", ".", "a", "  ", " x \n"] {
            let transcriber = Scripted::new(Ok(text.to_string()));
            let handoff = TranscriptionHandoff::new(transcriber.clone());
            assert!(
                matches!(handoff.run(artifact()).await, HandoffOutcome::NoSpeech),
                "{text:?} should be no speech"
            );
            assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn transcript_is_trimmed_and_delivered() {
        let transcriber = Scripted::new(Ok("  photosynthesis for class 5 \n".into()));
        let handoff = TranscriptionHandoff::new(transcriber.clone());
        match handoff.run(artifact()).await {
            HandoffOutcome::Transcript(text) => assert_eq!(text, "photosynthesis for class 5"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transcriber.seen_mime.lock().as_deref(), Some("audio/webm"));
    }

    #[tokio::test]
    async fn failures_are_reported_without_retry() {
        let transcriber = Scripted::new(Err(TranscribeError::ApiError("503".into())));
        let handoff = TranscriptionHandoff::new(transcriber.clone());
        assert!(matches!(
            handoff.run(artifact()).await,
            HandoffOutcome::Failed(TranscribeError::ApiError(_))
        ));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_audio_never_reaches_the_transcriber() {
        let transcriber = Scripted::new(Ok("phantom".into()));
        let handoff = TranscriptionHandoff::new(transcriber.clone());
        let outcome = handoff.run(AudioArtifact::new(Bytes::new(), "audio/wav")).await;
        assert!(matches!(outcome, HandoffOutcome::NoSpeech));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn two_characters_is_enough() {
        let transcriber = Scripted::new(Ok("ok".into()));
        let handoff = TranscriptionHandoff::new(transcriber);
        assert!(matches!(
            handoff.run(artifact()).await,
            HandoffOutcome::Transcript(t) if t == "ok"
        ));
    }
}
