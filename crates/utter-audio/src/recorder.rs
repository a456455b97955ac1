//! Microphone capture through cpal with an in-memory WAV encoder.
//!
//! cpal streams are not `Send` on every host, so each acquired device gets a
//! dedicated capture thread that owns the stream for its whole life. The
//! session talks to that thread through a control channel and reads the
//! live signal through a shared ring of recent samples.
//!
//! ## Format notes
//!
//! Wav ~ 467KiB every 5 seconds at 48kHz mono f32. With the default 30 second
//! ceiling a capture stays under 3MiB, well below upload limits.

use std::collections::VecDeque;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use hound::WavWriter;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::device::{AudioDevice, CaptureStream, FragmentSender, RecorderError, Result};
use crate::sampler::to_unsigned_pcm;

const WAV_MIME: &str = "audio/wav";
const DEFAULT_DEVICE_ID: &str = "default";

type WavWriterHandle = Arc<Mutex<Option<WavWriter<MemoryWriter>>>>;
type WindowHandle = Arc<Mutex<VecDeque<f32>>>;

/// A cheaply cloneable handle to the inner data that is being recorded. The
/// finalize method for the wav writer does not return the inner data, so we
/// store it behind an Arc<Mutex> to allow for cheap cloning and access to the
/// inner data.
#[derive(Clone)]
struct MemoryWriter {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(Vec::with_capacity(64 * 1024)))),
        }
    }

    fn try_into_inner(self) -> Result<Vec<u8>> {
        let owned = Arc::try_unwrap(self.inner).map_err(|_| {
            RecorderError::Anyhow(anyhow!("Failed to unwrap inner Arc in MemoryWriter"))
        })?;
        Ok(owned.into_inner().into_inner())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// A cpal input device, the host default unless a name is given.
#[derive(Debug, Clone)]
pub struct CpalDevice {
    device_name: Option<String>,
    window_size: usize,
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            device_name: None,
            window_size: 2048,
        }
    }

    pub fn with_device(mut self, name: Option<impl Into<String>>) -> Self {
        self.device_name = name.map(Into::into);
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }
}

#[async_trait]
impl AudioDevice for CpalDevice {
    fn id(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_owned())
    }

    async fn acquire(&self) -> Result<Box<dyn CaptureStream>> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (control_tx, control_rx) = std_mpsc::channel();
        let device_name = self.device_name.clone();
        let window_size = self.window_size;
        let failures = control_tx.clone();

        std::thread::Builder::new()
            .name("utter-capture".into())
            .spawn(move || {
                capture_thread(device_name, window_size, ready_tx, control_rx, failures)
            })
            .map_err(|e| RecorderError::Anyhow(e.into()))?;

        let window = ready_rx
            .await
            .map_err(|_| anyhow!("capture thread exited before opening the device"))??;

        Ok(Box::new(CpalCapture {
            control: control_tx,
            window,
            encoder_started: false,
            released: false,
        }))
    }
}

enum Control {
    StartEncoder(FragmentSender),
    StopEncoder,
    /// The stream reported an error, usually because the device went away
    StreamFailed,
    Release,
}

/// Handle to a stream owned by a capture thread. Releasing or dropping it
/// closes the stream.
pub struct CpalCapture {
    control: std_mpsc::Sender<Control>,
    window: WindowHandle,
    encoder_started: bool,
    released: bool,
}

impl CaptureStream for CpalCapture {
    fn mime_type(&self) -> &str {
        WAV_MIME
    }

    fn start_encoder(&mut self, sink: FragmentSender) -> Result<()> {
        if self.encoder_started || self.released {
            return Err(RecorderError::EncoderState);
        }
        self.control
            .send(Control::StartEncoder(sink))
            .map_err(|_| anyhow!("capture thread is gone"))?;
        self.encoder_started = true;
        Ok(())
    }

    fn read_window(&mut self, window: &mut [u8]) -> usize {
        let samples = self.window.lock();
        let skip = samples.len().saturating_sub(window.len());
        let mut written = 0;
        for (slot, &sample) in window.iter_mut().zip(samples.iter().skip(skip)) {
            *slot = to_unsigned_pcm(sample);
            written += 1;
        }
        written
    }

    fn stop_encoder(&mut self) {
        if self.control.send(Control::StopEncoder).is_err() {
            warn!("capture thread gone before encoder stop");
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // The thread may already have exited after an error.
        self.control.send(Control::Release).ok();
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

struct OpenStream {
    stream: cpal::Stream,
    writer: WavWriterHandle,
    window: WindowHandle,
    spec: hound::WavSpec,
}

fn capture_thread(
    device_name: Option<String>,
    window_size: usize,
    ready: oneshot::Sender<Result<WindowHandle>>,
    control: std_mpsc::Receiver<Control>,
    failures: std_mpsc::Sender<Control>,
) {
    let opened = match open_stream(device_name.as_deref(), window_size, failures) {
        Ok(opened) => opened,
        Err(e) => {
            ready.send(Err(e)).ok();
            return;
        }
    };
    if ready.send(Ok(opened.window.clone())).is_err() {
        debug!("acquirer went away, closing stream");
        return;
    }

    let OpenStream {
        stream,
        writer,
        spec,
        ..
    } = opened;
    let mut buffer: Option<MemoryWriter> = None;
    let mut sink: Option<FragmentSender> = None;

    while let Ok(command) = control.recv() {
        match command {
            Control::StartEncoder(tx) => {
                let memory = MemoryWriter::new();
                match WavWriter::new(memory.clone(), spec) {
                    Ok(wav) => {
                        *writer.lock() = Some(wav);
                        buffer = Some(memory);
                        sink = Some(tx);
                        debug!("encoder started");
                    }
                    // Dropping tx reports the encoder as stopped with no data.
                    Err(e) => error!("failed to start wav encoder: {}", e),
                }
            }
            Control::StopEncoder => {
                stream.pause().ok();
                flush_encoder(&writer, &mut buffer, &mut sink);
            }
            Control::StreamFailed => {
                // Keep what was captured so far and report the encoder as ended.
                stream.pause().ok();
                if sink.is_some() {
                    warn!("capture stream failed, ending encoder");
                }
                flush_encoder(&writer, &mut buffer, &mut sink);
            }
            Control::Release => break,
        }
    }

    drop(stream);
    debug!("capture stream closed");
}

/// Finalize the recording, send it as the only fragment, then drop the sink
/// so the receiver sees the encoder as stopped. A no-op once flushed.
fn flush_encoder(
    writer: &WavWriterHandle,
    buffer: &mut Option<MemoryWriter>,
    sink: &mut Option<FragmentSender>,
) {
    let (Some(memory), Some(tx)) = (buffer.take(), sink.take()) else {
        return;
    };
    match finish_wav(writer, memory) {
        Ok(Some(data)) => {
            info!(bytes = data.len(), "Ending recording.");
            tx.send(Bytes::from(data)).ok();
        }
        Ok(None) => debug!("encoder stopped without samples"),
        Err(e) => error!("failed to finalize recording: {}", e),
    }
}

/// Stream error callback. The first error asks the capture thread to end the
/// encoder; later ones are only logged.
fn stream_error_handler(
    failures: std_mpsc::Sender<Control>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let mut reported = false;
    move |err| {
        error!("an error occurred on stream: {}", err);
        if !reported {
            reported = true;
            failures.send(Control::StreamFailed).ok();
        }
    }
}

/// Finalize the writer and hand back the encoded bytes, or `None` when no
/// samples were written.
fn finish_wav(writer: &WavWriterHandle, memory: MemoryWriter) -> Result<Option<Vec<u8>>> {
    let Some(wav) = writer.lock().take() else {
        return Ok(None);
    };
    let samples = wav.len();
    wav.finalize()
        .map_err(|e| RecorderError::Anyhow(anyhow!("Failed to finalize writer: {}", e)))?;
    if samples == 0 {
        return Ok(None);
    }
    memory.try_into_inner().map(Some)
}

fn open_stream(
    device_name: Option<&str>,
    window_size: usize,
    failures: std_mpsc::Sender<Control>,
) -> Result<OpenStream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| RecorderError::Anyhow(e.into()))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| RecorderError::DeviceNotFound(name.to_owned()))?,
        None => host
            .default_input_device()
            .ok_or(RecorderError::NoInputDevice)?,
    };
    let config = device
        .default_input_config()
        .map_err(|_| RecorderError::NoInputDevice)?;

    info!(
        device_name = %device.name().unwrap_or_else(|_| "unknown".into()),
        config = ?config,
        "Recording from device"
    );

    let spec = wav_spec_from_config(&config);
    let writer: WavWriterHandle = Arc::new(Mutex::new(None));
    let window: WindowHandle = Arc::new(Mutex::new(VecDeque::with_capacity(window_size)));

    let stream = match config.sample_format() {
        cpal::SampleFormat::I8 => {
            build_stream::<i8>(&device, &config, writer.clone(), window.clone(), window_size, failures)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, writer.clone(), window.clone(), window_size, failures)?
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(&device, &config, writer.clone(), window.clone(), window_size, failures)?
        }
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config, writer.clone(), window.clone(), window_size, failures)?
        }
        sample_format => {
            return Err(RecorderError::SampleFormatNotSupported(format!(
                "{:?}",
                sample_format
            )));
        }
    };

    stream.play()?;

    Ok(OpenStream {
        stream,
        writer,
        window,
        spec,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    writer: WavWriterHandle,
    window: WindowHandle,
    window_size: usize,
    failures: std_mpsc::Sender<Control>,
) -> Result<cpal::Stream>
where
    T: SizedSample + hound::Sample,
    f32: FromSample<T>,
{
    let err_fn = stream_error_handler(failures);
    let stream = device.build_input_stream(
        &config.config(),
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            write_input_data(data, &writer);
            push_window(data, &window, window_size);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn wav_spec_from_config(config: &cpal::SupportedStreamConfig) -> hound::WavSpec {
    hound::WavSpec {
        channels: config.channels(),
        sample_rate: config.sample_rate().0,
        bits_per_sample: (config.sample_format().sample_size() * 8) as _,
        sample_format: sample_format(config.sample_format()),
    }
}

fn sample_format(format: cpal::SampleFormat) -> hound::SampleFormat {
    if format.is_float() {
        hound::SampleFormat::Float
    } else {
        hound::SampleFormat::Int
    }
}

fn write_input_data<T>(input: &[T], writer: &WavWriterHandle)
where
    T: Sample + hound::Sample,
{
    if let Some(mut guard) = writer.try_lock() {
        if let Some(writer) = guard.as_mut() {
            for &sample in input.iter() {
                writer.write_sample(sample).ok();
            }
        }
    }
}

/// Keep the latest `window_size` samples, normalized to f32.
fn push_window<T>(input: &[T], window: &WindowHandle, window_size: usize)
where
    T: Sample,
    f32: FromSample<T>,
{
    if let Some(mut window) = window.try_lock() {
        let skip = input.len().saturating_sub(window_size);
        for &sample in &input[skip..] {
            window.push_back(f32::from_sample(sample));
        }
        while window.len() > window_size {
            window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_latest_samples() {
        let window: WindowHandle = Arc::new(Mutex::new(VecDeque::new()));
        push_window(&[0.1f32, 0.2, 0.3], &window, 4);
        push_window(&[0.4f32, 0.5], &window, 4);
        let kept: Vec<f32> = window.lock().iter().copied().collect();
        assert_eq!(kept, vec![0.2, 0.3, 0.4, 0.5]);

        push_window(&[0.0f32; 10], &window, 4);
        assert_eq!(window.lock().len(), 4);
    }

    #[test]
    fn integer_samples_are_normalized() {
        let window: WindowHandle = Arc::new(Mutex::new(VecDeque::new()));
        push_window(&[i16::MIN, 0], &window, 8);
        let kept: Vec<f32> = window.lock().iter().copied().collect();
        assert_eq!(kept, vec![-1.0, 0.0]);
    }

    #[test]
    fn read_window_converts_most_recent_samples() {
        let (control, _rx) = std_mpsc::channel();
        let mut capture = CpalCapture {
            control,
            window: Arc::new(Mutex::new(VecDeque::from(vec![0.9, 0.0, -1.0, 1.0]))),
            encoder_started: false,
            released: false,
        };
        let mut out = [128u8; 2];
        assert_eq!(capture.read_window(&mut out), 2);
        assert_eq!(out, [0, 255]);

        let mut wide = [128u8; 8];
        assert_eq!(capture.read_window(&mut wide), 4);
        assert_eq!(wide[4..], [128; 4]);
    }

    #[test]
    fn finish_without_samples_yields_nothing() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let memory = MemoryWriter::new();
        let writer: WavWriterHandle =
            Arc::new(Mutex::new(Some(WavWriter::new(memory.clone(), spec).unwrap())));
        assert!(finish_wav(&writer, memory).unwrap().is_none());
    }

    #[test]
    fn finish_returns_a_readable_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let memory = MemoryWriter::new();
        let writer: WavWriterHandle =
            Arc::new(Mutex::new(Some(WavWriter::new(memory.clone(), spec).unwrap())));
        write_input_data(&[1i16, -1, 300], &writer);

        let data = finish_wav(&writer, memory).unwrap().unwrap();
        let reader = hound::WavReader::new(Cursor::new(data)).unwrap();
        assert_eq!(reader.len(), 3);
        assert!(writer.lock().is_none());
    }

    fn wav_writer() -> (WavWriterHandle, MemoryWriter) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let memory = MemoryWriter::new();
        let writer = Arc::new(Mutex::new(Some(WavWriter::new(memory.clone(), spec).unwrap())));
        (writer, memory)
    }

    #[test]
    fn flush_sends_one_fragment_and_ends_the_encoder() {
        let (writer, memory) = wav_writer();
        write_input_data(&[5i16, -5, 9, 12], &writer);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut buffer = Some(memory);
        let mut sink = Some(tx);

        flush_encoder(&writer, &mut buffer, &mut sink);
        assert!(buffer.is_none() && sink.is_none());

        let fragment = rx.try_recv().unwrap();
        let reader = hound::WavReader::new(Cursor::new(fragment.to_vec())).unwrap();
        assert_eq!(reader.len(), 4);
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));

        // A stop arriving after a stream failure has nothing left to flush.
        flush_encoder(&writer, &mut buffer, &mut sink);
    }

    #[test]
    fn stream_errors_end_the_encoder_once() {
        let (failures, control) = std_mpsc::channel();
        let mut on_error = stream_error_handler(failures);
        on_error(cpal::StreamError::DeviceNotAvailable);
        on_error(cpal::StreamError::DeviceNotAvailable);

        assert!(matches!(control.try_recv(), Ok(Control::StreamFailed)));
        assert!(control.try_recv().is_err());
    }

    #[test]
    fn encoder_cannot_start_after_release() {
        let (control, _rx) = std_mpsc::channel();
        let mut capture = CpalCapture {
            control,
            window: Arc::default(),
            encoder_started: false,
            released: false,
        };
        capture.release();
        let (tx, _frag_rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(matches!(
            capture.start_encoder(tx),
            Err(RecorderError::EncoderState)
        ));
    }
}
