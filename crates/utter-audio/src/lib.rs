//! Audio capture for utter.
//!
//! Owns everything between the microphone and the session engine: the
//! device abstraction and its cpal implementation, exclusive device claims,
//! per-frame amplitude sampling and voice activity detection.

mod device;
mod recorder;
mod registry;
mod sampler;
mod vad;

pub use device::{AudioDevice, CaptureStream, FragmentSender, RecorderError};
pub use recorder::{CpalCapture, CpalDevice};
pub use registry::{DeviceBusy, DeviceLease, DeviceRegistry};
pub use sampler::{AmplitudeSampler, PCM_CENTER, WaveformSink, peak_amplitude, to_unsigned_pcm};
pub use vad::{VadState, VoiceActivityDetector};
