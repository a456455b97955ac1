//! Desktop notifications for session notices and failures.

use notify_rust::Notification;
use tracing::error;
use utter_core::{ErrorKind, NoSpeechReason};

use crate::listener::TranscriptListener;
use crate::{APP_NAME, APP_NAME_PRETTY};

/// Send a system notification with a summary and body.
pub fn notify(summary: &str, body: &str) {
    Notification::new()
        .appname(APP_NAME)
        .summary(&format!("{} - {}", APP_NAME_PRETTY, summary))
        .body(body)
        .show()
        .map_err(|e| error!("Failed to send notification: {}", e))
        .ok();
}

/// Listener that surfaces no-speech notices and errors as notifications.
/// Transcripts are left to other listeners.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl TranscriptListener for DesktopNotifier {
    fn on_transcript_ready(&self, _text: &str) {}

    fn on_no_speech_detected(&self, reason: NoSpeechReason) {
        notify("No speech detected", reason.message());
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        notify(&kind.to_string(), message);
    }
}
