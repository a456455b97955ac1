//! Resources and detector state for one recording attempt.
//!
//! A `RecordingSession` exists from a successful device acquisition until the
//! encoder reports that it has stopped. Dropping it cancels its timers and
//! releases the device, whatever state it was in.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};
use utter_audio::{
    AmplitudeSampler, CaptureStream, DeviceLease, RecorderError, VoiceActivityDetector,
    WaveformSink,
};
use utter_core::{StopReason, VadEvent};

use crate::engine::{Message, SessionConfig};

const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Summary of a finished capture, for diagnostics and the noise gate.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub reason: StopReason,
    /// Time from the start of capture to the stop request
    pub elapsed: Duration,
    pub max_volume: f32,
    pub speech_duration: Duration,
    pub met_min_speech: bool,
    pub longest_speech_run: u32,
    pub total_speech_frames: u32,
    pub too_quiet: bool,
    pub short_noise: bool,
    pub fragments: usize,
    pub bytes: usize,
}

pub(crate) enum Frame {
    Quiet,
    Activity(VadEvent, Duration),
    FailsafeElapsed,
}

pub(crate) struct RecordingSession {
    id: u64,
    stream: Box<dyn CaptureStream>,
    _lease: DeviceLease,
    mime_type: String,
    started_at: Instant,
    failsafe_deadline: Instant,
    sampler: AmplitudeSampler,
    vad: VoiceActivityDetector,
    collected: Vec<Bytes>,
    ticker: JoinHandle<()>,
    failsafe: JoinHandle<()>,
    report: Option<CaptureReport>,
}

impl RecordingSession {
    /// Start the encoder and arm the frame ticker and failsafe timer. All
    /// three report back through `mailbox`, tagged with `id`.
    pub(crate) fn begin(
        id: u64,
        mut stream: Box<dyn CaptureStream>,
        lease: DeviceLease,
        config: &SessionConfig,
        mailbox: mpsc::UnboundedSender<Message>,
    ) -> Result<Self, RecorderError> {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        if let Err(e) = stream.start_encoder(fragment_tx) {
            stream.release();
            return Err(e);
        }

        let started_at = Instant::now();
        let failsafe_deadline = started_at + config.thresholds.max_recording_time();

        let period = config.frame_interval.max(MIN_FRAME_INTERVAL);
        tokio::spawn(forward_fragments(id, fragment_rx, mailbox.clone()));
        let ticker = tokio::spawn(tick_frames(id, period, mailbox.clone()));
        let failsafe = tokio::spawn(async move {
            time::sleep_until(failsafe_deadline).await;
            mailbox
                .send(Message::Stop {
                    reason: StopReason::Failsafe,
                    session: Some(id),
                })
                .ok();
        });

        Ok(Self {
            id,
            mime_type: stream.mime_type().to_owned(),
            stream,
            _lease: lease,
            started_at,
            failsafe_deadline,
            sampler: AmplitudeSampler::new(config.window_size),
            vad: VoiceActivityDetector::new(config.thresholds),
            collected: Vec::new(),
            ticker,
            failsafe,
            report: None,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn push_fragment(&mut self, data: Bytes) {
        trace!(session = self.id, bytes = data.len(), "fragment");
        self.collected.push(data);
    }

    /// Sample one frame and feed it to the detector. The failsafe deadline is
    /// checked first so it wins over a simultaneous auto-stop.
    pub(crate) fn frame(&mut self, sink: Option<&dyn WaveformSink>) -> Frame {
        let now = Instant::now();
        if now >= self.failsafe_deadline {
            return Frame::FailsafeElapsed;
        }

        let at = now - self.started_at;
        let peak = self.sampler.sample(self.stream.as_mut(), sink);
        trace!(session = self.id, peak, at_ms = at.as_millis() as u64, "frame");

        match self.vad.feed(peak, at) {
            Some(event) => Frame::Activity(event, at),
            None => Frame::Quiet,
        }
    }

    /// Cancel the timers, then ask the encoder to flush and let go of the
    /// media tracks. Returns false if the session was already stopped.
    pub(crate) fn stop(&mut self, reason: StopReason) -> bool {
        if self.report.is_some() {
            return false;
        }
        self.ticker.abort();
        self.failsafe.abort();
        self.report = Some(self.build_report(reason));

        self.stream.stop_encoder();
        self.stream.release();
        true
    }

    pub(crate) fn report(&self) -> Option<&CaptureReport> {
        self.report.as_ref()
    }

    /// Hand over everything the encoder produced along with the final report.
    pub(crate) fn finish(mut self) -> (Vec<Bytes>, String, CaptureReport) {
        let fragments = std::mem::take(&mut self.collected);
        let mime_type = std::mem::take(&mut self.mime_type);
        let mut report = match self.report.take() {
            Some(report) => report,
            None => self.build_report(StopReason::EncoderEnded),
        };
        report.fragments = fragments.len();
        report.bytes = fragments.iter().map(Bytes::len).sum();
        (fragments, mime_type, report)
    }

    fn build_report(&self, reason: StopReason) -> CaptureReport {
        let elapsed = Instant::now() - self.started_at;
        let state = self.vad.state();
        CaptureReport {
            reason,
            elapsed,
            max_volume: state.max_volume_observed,
            speech_duration: self.vad.speech_duration(elapsed),
            met_min_speech: self.vad.met_min_speech(elapsed),
            longest_speech_run: state.longest_speech_run,
            total_speech_frames: state.total_speech_frames,
            too_quiet: self.vad.too_quiet(),
            short_noise: self.vad.short_noise(),
            fragments: 0,
            bytes: 0,
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.ticker.abort();
        self.failsafe.abort();
        self.stream.release();
        debug!(session = self.id, "session resources released");
    }
}

async fn forward_fragments(
    id: u64,
    mut fragments: mpsc::UnboundedReceiver<Bytes>,
    mailbox: mpsc::UnboundedSender<Message>,
) {
    while let Some(data) = fragments.recv().await {
        if mailbox.send(Message::Fragment { session: id, data }).is_err() {
            return;
        }
    }
    mailbox.send(Message::EncoderStopped { session: id }).ok();
}

async fn tick_frames(id: u64, period: Duration, mailbox: mpsc::UnboundedSender<Message>) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if mailbox.send(Message::Tick { session: id }).is_err() {
            break;
        }
    }
}
