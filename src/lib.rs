// Re-export from sub-crates
pub use utter_audio::{
    AudioDevice, CaptureStream, CpalDevice, DeviceBusy, DeviceRegistry, FragmentSender,
    RecorderError, WaveformSink,
};
pub use utter_core::{
    APP_NAME, APP_NAME_PRETTY, AudioArtifact, Config, ConfigManager, DEFAULT_LOG_LEVEL, ErrorKind,
    NoSpeechReason, SessionState, StopReason, Thresholds, VadEvent,
};
pub use utter_transcribe::{OpenAIClient, OpenAIConfig, TranscribeError, Transcriber};

// App-specific modules
pub mod engine;
pub mod listener;
pub mod notify;
mod session;

pub use engine::{CaptureEngine, EngineHandle, SessionConfig, StartError};
pub use listener::{Outcome, OutcomeLog, TranscriptListener};
pub use session::CaptureReport;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
