use std::sync::Arc;

use anyhow::{Context, Result};
use arboard::Clipboard;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utter::listener::TranscriptListener;
use utter::notify::DesktopNotifier;
use utter::{
    CaptureEngine, CaptureReport, ConfigManager, CpalDevice, DEFAULT_LOG_LEVEL, ErrorKind,
    NoSpeechReason, OpenAIClient, OpenAIConfig, SessionConfig, SessionState, VERSION,
};

/// Prints transcripts to stdout and optionally copies them to the clipboard.
struct Terminal {
    clipboard: Option<Mutex<Clipboard>>,
}

impl Terminal {
    fn new(copy_to_clipboard: bool) -> Self {
        let clipboard = copy_to_clipboard
            .then(|| match Clipboard::new() {
                Ok(clipboard) => Some(Mutex::new(clipboard)),
                Err(e) => {
                    warn!("Failed to open clipboard: {}", e);
                    None
                }
            })
            .flatten();
        Self { clipboard }
    }
}

impl TranscriptListener for Terminal {
    fn on_transcript_ready(&self, text: &str) {
        println!("{}", text);
        if let Some(clipboard) = &self.clipboard {
            if let Err(e) = clipboard.lock().set_text(text) {
                warn!("Failed to set clipboard text: {}", e);
            }
        }
    }

    fn on_no_speech_detected(&self, reason: NoSpeechReason) {
        eprintln!("No speech detected. {}", reason.message());
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        eprintln!("{}: {}", kind, message);
    }

    fn on_state_changed(&self, state: SessionState) {
        if state == SessionState::Recording {
            eprintln!("Listening... press Ctrl-C to stop");
        }
    }

    fn on_capture_stopped(&self, report: &CaptureReport) {
        info!(
            reason = %report.reason,
            elapsed = ?report.elapsed,
            bytes = report.bytes,
            "capture finished"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("UTTER_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config)?;

    let api_key = config.key_openai().with_context(|| {
        format!(
            "No OpenAI API key; set OPENAI_API_KEY or openai_key in {}",
            config_manager.config_path().display()
        )
    })?;
    let mut openai = OpenAIConfig::new(api_key);
    if let Some(model) = config.model() {
        openai = openai.with_model(model);
    }
    if let Some(language) = config.language() {
        openai = openai.with_language(language);
    }

    let device = CpalDevice::new()
        .with_device(config.device())
        .with_window_size(config.window_size);

    let mut listeners: Vec<Arc<dyn TranscriptListener>> =
        vec![Arc::new(Terminal::new(config.copy_to_clipboard))];
    if config.notifications {
        listeners.push(Arc::new(DesktopNotifier));
    }

    let engine = CaptureEngine::new(
        Arc::new(device),
        Arc::new(OpenAIClient::new(openai)),
        Arc::new(listeners),
    )
    .with_config(SessionConfig::from(&config))
    .spawn();

    info!(version = VERSION, "Utter ready");
    if let Err(e) = engine.start().await {
        error!(error = %e, "Failed to start recording");
        return Err(e.into());
    }

    let stopper = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested");
            stopper.stop();
        }
    });

    match engine.finished().await {
        SessionState::Error => anyhow::bail!("recording failed"),
        _ => Ok(()),
    }
}
