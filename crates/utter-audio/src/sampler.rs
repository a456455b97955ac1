//! Reduces time-domain windows to a single peak amplitude per frame.

use crate::device::CaptureStream;

/// Midpoint of unsigned 8-bit PCM.
pub const PCM_CENTER: u8 = 128;

/// Observer of raw windows, e.g. a waveform renderer. Never affects control
/// flow.
pub trait WaveformSink: Send + Sync {
    fn on_window(&self, window: &[u8]);
}

/// Peak distance from `center` over all samples in the window.
pub fn peak_amplitude(window: &[u8], center: u8) -> f32 {
    window
        .iter()
        .map(|&s| s.abs_diff(center))
        .max()
        .unwrap_or(0) as f32
}

/// Pulls one window per frame from a capture stream into a reused buffer.
pub struct AmplitudeSampler {
    window: Box<[u8]>,
}

impl AmplitudeSampler {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: vec![PCM_CENTER; window_size.max(1)].into_boxed_slice(),
        }
    }

    /// Read the latest window and return its peak amplitude.
    pub fn sample(
        &mut self,
        stream: &mut dyn CaptureStream,
        sink: Option<&dyn WaveformSink>,
    ) -> f32 {
        self.window.fill(PCM_CENTER);
        stream.read_window(&mut self.window);
        if let Some(sink) = sink {
            sink.on_window(&self.window);
        }
        peak_amplitude(&self.window, PCM_CENTER)
    }
}

/// Convert a normalized float sample to centered unsigned 8-bit PCM.
pub fn to_unsigned_pcm(sample: f32) -> u8 {
    let scaled = sample.clamp(-1.0, 1.0) * 128.0 + PCM_CENTER as f32;
    scaled.round().clamp(0.0, 255.0) as u8
}
