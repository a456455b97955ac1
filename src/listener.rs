//! The caller side of a capture session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use utter_core::{ErrorKind, NoSpeechReason, SessionState, VadEvent};

use crate::session::CaptureReport;

/// Receives the results of capture sessions. The engine only decides that an
/// utterance ended; what the transcript means is up to the listener.
///
/// Callbacks run on the engine task and should return quickly.
pub trait TranscriptListener: Send + Sync {
    /// A non-trivial transcript is ready.
    fn on_transcript_ready(&self, text: &str);

    /// The capture finished but nothing meaningful was said.
    fn on_no_speech_detected(&self, reason: NoSpeechReason);

    /// Device or transcription failure. The session is already back in a
    /// terminal state when this is called.
    fn on_error(&self, kind: ErrorKind, message: &str);

    fn on_state_changed(&self, _state: SessionState) {}

    /// Speech or silence detected, `at` is measured from the session start.
    fn on_voice_activity(&self, _event: VadEvent, _at: Duration) {}

    fn on_capture_stopped(&self, _report: &CaptureReport) {}
}

/// Forwards every callback to each listener in order.
impl TranscriptListener for Vec<Arc<dyn TranscriptListener>> {
    fn on_transcript_ready(&self, text: &str) {
        self.iter().for_each(|l| l.on_transcript_ready(text));
    }

    fn on_no_speech_detected(&self, reason: NoSpeechReason) {
        self.iter().for_each(|l| l.on_no_speech_detected(reason));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.iter().for_each(|l| l.on_error(kind, message));
    }

    fn on_state_changed(&self, state: SessionState) {
        self.iter().for_each(|l| l.on_state_changed(state));
    }

    fn on_voice_activity(&self, event: VadEvent, at: Duration) {
        self.iter().for_each(|l| l.on_voice_activity(event, at));
    }

    fn on_capture_stopped(&self, report: &CaptureReport) {
        self.iter().for_each(|l| l.on_capture_stopped(report));
    }
}

/// A user-facing result of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Transcript(String),
    NoSpeech(NoSpeechReason),
    Error(ErrorKind, String),
}

/// Listener that keeps everything it is told, for polling callers and tests.
#[derive(Debug, Default)]
pub struct OutcomeLog {
    outcomes: Mutex<Vec<Outcome>>,
    states: Mutex<Vec<SessionState>>,
    activity: Mutex<Vec<(VadEvent, Duration)>>,
    reports: Mutex<Vec<CaptureReport>>,
}

impl OutcomeLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.outcomes.lock().last().cloned()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().clone()
    }

    pub fn activity(&self) -> Vec<(VadEvent, Duration)> {
        self.activity.lock().clone()
    }

    pub fn reports(&self) -> Vec<CaptureReport> {
        self.reports.lock().clone()
    }
}

impl TranscriptListener for OutcomeLog {
    fn on_transcript_ready(&self, text: &str) {
        self.outcomes.lock().push(Outcome::Transcript(text.to_owned()));
    }

    fn on_no_speech_detected(&self, reason: NoSpeechReason) {
        self.outcomes.lock().push(Outcome::NoSpeech(reason));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.outcomes
            .lock()
            .push(Outcome::Error(kind, message.to_owned()));
    }

    fn on_state_changed(&self, state: SessionState) {
        self.states.lock().push(state);
    }

    fn on_voice_activity(&self, event: VadEvent, at: Duration) {
        self.activity.lock().push((event, at));
    }

    fn on_capture_stopped(&self, report: &CaptureReport) {
        self.reports.lock().push(report.clone());
    }
}
