//! Capture device abstraction.
//!
//! A device is acquired once per session and yields a [`CaptureStream`]: an
//! encoder that pushes encoded fragments into a channel, plus a tap on the
//! live signal for amplitude windows. The encoder signals that it has fully
//! stopped by dropping its fragment sender.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// generic anyhow error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    /// No recording device available
    #[error("no input device available")]
    NoInputDevice,
    /// A named device was requested but not found
    #[error("input device not found: {0}")]
    DeviceNotFound(String),
    /// Sample format not supported
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),
    /// Build stream error
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    /// Play stream error
    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
    /// The encoder was started twice or after release
    #[error("encoder already started or released")]
    EncoderState,
}

pub type Result<T> = std::result::Result<T, RecorderError>;

/// Receives encoded fragments as the encoder produces them.
pub type FragmentSender = mpsc::UnboundedSender<Bytes>;

/// A source of capture streams, typically one physical microphone.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Stable identifier used to enforce exclusive ownership.
    fn id(&self) -> String;

    /// Open the device. May wait on a permission prompt.
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>>;
}

/// A live, exclusively owned capture stream.
pub trait CaptureStream: Send {
    /// Encoding tag of the fragments this stream produces.
    fn mime_type(&self) -> &str;

    /// Start encoding. Fragments go to `sink`; dropping `sink` marks the
    /// encoder as stopped.
    fn start_encoder(&mut self, sink: FragmentSender) -> Result<()>;

    /// Copy the most recent time-domain samples into `window` as unsigned
    /// 8-bit PCM centered at 128. Returns how many entries were written;
    /// the remainder is left at the center value.
    fn read_window(&mut self, window: &mut [u8]) -> usize;

    /// Ask the encoder to flush and stop. Completion is signalled
    /// asynchronously by the fragment sender being dropped.
    fn stop_encoder(&mut self);

    /// Stop the underlying media tracks. A pending encoder flush still
    /// completes. Safe to call more than once.
    fn release(&mut self);
}
