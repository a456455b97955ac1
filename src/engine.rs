//! The capture session engine.
//!
//! One actor task owns the session state machine. The caller, the frame
//! ticker, the failsafe timer, the encoder and the transcription task never
//! touch that state; they send messages and the actor applies them in
//! arrival order. Every message from a timer or the encoder carries the id of
//! the session that armed it, so anything arriving after that session ended
//! is dropped. Stop requests are only honored in `Recording`, which makes a
//! second stop from any source a no-op.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use utter_audio::{AudioDevice, DeviceBusy, DeviceRegistry, RecorderError, WaveformSink};
use utter_core::{
    AudioArtifact, Config, ErrorKind, NoSpeechReason, SessionState, StopReason, Thresholds,
    VadEvent,
};
use utter_transcribe::{HandoffOutcome, Transcriber, TranscriptionHandoff};

use crate::listener::TranscriptListener;
use crate::session::{Frame, RecordingSession};

/// Per-session settings, fixed when a session starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub thresholds: Thresholds,
    /// Time between amplitude samples
    pub frame_interval: Duration,
    /// Samples per amplitude window
    pub window_size: usize,
    /// Reject quiet or blip-only captures before transcribing
    pub reject_noise: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            thresholds: config.vad,
            frame_interval: config.frame_interval(),
            window_size: config.window_size,
            reject_noise: config.reject_noise,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a session is already {0}")]
    Busy(SessionState),
    #[error(transparent)]
    DeviceBusy(#[from] DeviceBusy),
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(#[source] RecorderError),
    #[error("capture engine has shut down")]
    EngineClosed,
}

pub(crate) enum Message {
    Start(oneshot::Sender<Result<(), StartError>>),
    Stop {
        reason: StopReason,
        session: Option<u64>,
    },
    Tick {
        session: u64,
    },
    Fragment {
        session: u64,
        data: Bytes,
    },
    EncoderStopped {
        session: u64,
    },
    HandoffFinished {
        session: u64,
        outcome: HandoffOutcome,
    },
}

/// Builder for the engine actor.
pub struct CaptureEngine {
    device: Arc<dyn AudioDevice>,
    registry: DeviceRegistry,
    handoff: TranscriptionHandoff,
    listener: Arc<dyn TranscriptListener>,
    waveform: Option<Arc<dyn WaveformSink>>,
    config: SessionConfig,
}

impl CaptureEngine {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        transcriber: Arc<dyn Transcriber>,
        listener: Arc<dyn TranscriptListener>,
    ) -> Self {
        Self {
            device,
            registry: DeviceRegistry::new(),
            handoff: TranscriptionHandoff::new(transcriber),
            listener,
            waveform: None,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share device claims with other engines that may open the same device.
    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_waveform_sink(mut self, sink: Arc<dyn WaveformSink>) -> Self {
        self.waveform = Some(sink);
        self
    }

    /// Spawn the actor on the current tokio runtime. The actor exits once
    /// every handle is dropped and no session is in flight.
    pub fn spawn(self) -> EngineHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let actor = Actor {
            device: self.device,
            registry: self.registry,
            handoff: self.handoff,
            listener: self.listener,
            waveform: self.waveform,
            config: self.config,
            mailbox: mailbox.downgrade(),
            state: state_tx,
            session: None,
            transcribing: None,
            next_id: 0,
        };
        tokio::spawn(actor.run(inbox));

        EngineHandle {
            mailbox,
            state: state_rx,
        }
    }
}

/// Cheap, cloneable control surface for a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<SessionState>,
}

impl EngineHandle {
    /// Open the device and begin recording. Resolves once the session is
    /// `Recording` or the attempt has failed.
    pub async fn start(&self) -> Result<(), StartError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Message::Start(reply))
            .map_err(|_| StartError::EngineClosed)?;
        response.await.map_err(|_| StartError::EngineClosed)?
    }

    /// Ask the current recording to stop. A no-op unless `Recording`.
    ///
    /// The state is checked here, when the request is made. A stop sent while
    /// a `start()` is still acquiring the device would otherwise be queued
    /// behind it and end the new recording at once.
    pub fn stop(&self) {
        let state = self.state();
        if state != SessionState::Recording {
            debug!(%state, "stop ignored");
            return;
        }
        let stop = Message::Stop {
            reason: StopReason::Manual,
            session: None,
        };
        if self.mailbox.send(stop).is_err() {
            debug!("stop requested after engine shut down");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the engine is `Idle` or `Error`. Returns immediately if it
    /// already is.
    pub async fn finished(&self) -> SessionState {
        let mut state = self.state.clone();
        let result = state.wait_for(SessionState::is_terminal).await.map(|s| *s);
        result.unwrap_or_else(|_| *state.borrow())
    }
}

struct Actor {
    device: Arc<dyn AudioDevice>,
    registry: DeviceRegistry,
    handoff: TranscriptionHandoff,
    listener: Arc<dyn TranscriptListener>,
    waveform: Option<Arc<dyn WaveformSink>>,
    config: SessionConfig,
    mailbox: mpsc::WeakUnboundedSender<Message>,
    state: watch::Sender<SessionState>,
    session: Option<RecordingSession>,
    /// Session whose artifact is with the transcriber
    transcribing: Option<u64>,
    next_id: u64,
}

impl Actor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            self.handle(message).await;
        }
        debug!("capture engine stopped");
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Start(reply) => {
                let result = self.start().await;
                reply.send(result).ok();
            }
            Message::Stop { reason, session } => self.request_stop(reason, session),
            Message::Tick { session } => self.on_tick(session),
            Message::Fragment { session, data } => match self.session.as_mut() {
                Some(current) if current.id() == session => current.push_fragment(data),
                _ => debug!(session, "dropping stale fragment"),
            },
            Message::EncoderStopped { session } => self.on_encoder_stopped(session),
            Message::HandoffFinished { session, outcome } => {
                self.on_handoff_finished(session, outcome)
            }
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "session state changed");
            self.listener.on_state_changed(next);
        }
    }

    async fn start(&mut self) -> Result<(), StartError> {
        let current = self.current_state();
        if !current.is_terminal() {
            warn!(state = %current, "start rejected, session in progress");
            return Err(StartError::Busy(current));
        }

        let device_id = self.device.id();
        let lease = match self.registry.claim(&device_id) {
            Ok(lease) => lease,
            Err(busy) => {
                warn!(device = %device_id, "device held by another session");
                self.listener
                    .on_error(ErrorKind::DeviceBusy, &busy.to_string());
                return Err(busy.into());
            }
        };

        let stream = match self.device.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                drop(lease);
                return Err(self.device_unavailable(e));
            }
        };

        let Some(mailbox) = self.mailbox.upgrade() else {
            return Err(StartError::EngineClosed);
        };

        self.next_id += 1;
        let id = self.next_id;
        match RecordingSession::begin(id, stream, lease, &self.config, mailbox) {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(SessionState::Recording);
                info!(session = id, device = %device_id, "recording started");
                Ok(())
            }
            Err(e) => Err(self.device_unavailable(e)),
        }
    }

    fn device_unavailable(&self, e: RecorderError) -> StartError {
        error!(error = %e, "Microphone access denied");
        self.set_state(SessionState::Error);
        self.listener.on_error(
            ErrorKind::DeviceUnavailable,
            "Please allow microphone access and check that a microphone is connected.",
        );
        StartError::DeviceUnavailable(e)
    }

    fn request_stop(&mut self, reason: StopReason, target: Option<u64>) {
        let state = self.current_state();
        if state != SessionState::Recording {
            debug!(%reason, %state, "stop ignored");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if target.is_some_and(|id| id != session.id()) {
            debug!(%reason, "stale stop ignored");
            return;
        }

        if session.stop(reason) {
            if let Some(report) = session.report() {
                info!(
                    session = session.id(),
                    %reason,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    max_volume = report.max_volume,
                    speech_ms = report.speech_duration.as_millis() as u64,
                    met_min_speech = report.met_min_speech,
                    "recording stopped"
                );
            }
            self.set_state(SessionState::Stopping);
        }
    }

    fn on_tick(&mut self, id: u64) {
        if self.current_state() != SessionState::Recording {
            return;
        }
        let frame = match self.session.as_mut() {
            Some(session) if session.id() == id => session.frame(self.waveform.as_deref()),
            _ => return,
        };

        match frame {
            Frame::Quiet => {}
            Frame::Activity(event, at) => {
                self.listener.on_voice_activity(event, at);
                if event == VadEvent::AutoStopRequested {
                    self.request_stop(StopReason::AutoStop, Some(id));
                }
            }
            Frame::FailsafeElapsed => self.request_stop(StopReason::Failsafe, Some(id)),
        }
    }

    fn on_encoder_stopped(&mut self, id: u64) {
        if !self.session.as_ref().is_some_and(|s| s.id() == id) {
            debug!(session = id, "stale encoder stop");
            return;
        }
        if self.current_state() == SessionState::Recording {
            warn!(session = id, "encoder ended while recording");
            self.request_stop(StopReason::EncoderEnded, Some(id));
        }
        let Some(session) = self.session.take() else {
            return;
        };

        // Dropping the session here releases the device claim.
        let (fragments, mime_type, report) = session.finish();
        self.listener.on_capture_stopped(&report);

        let Some(artifact) = AudioArtifact::from_fragments(fragments, mime_type) else {
            debug!(session = id, "empty capture, nothing to transcribe");
            self.set_state(SessionState::Idle);
            return;
        };

        if self.config.reject_noise {
            let rejected = if report.too_quiet {
                Some(NoSpeechReason::TooQuiet)
            } else if report.short_noise {
                Some(NoSpeechReason::ShortNoise)
            } else {
                None
            };
            if let Some(reason) = rejected {
                info!(session = id, ?reason, "capture rejected as noise");
                self.set_state(SessionState::Idle);
                self.listener.on_no_speech_detected(reason);
                return;
            }
        }

        let Some(mailbox) = self.mailbox.upgrade() else {
            self.set_state(SessionState::Idle);
            return;
        };
        info!(
            session = id,
            bytes = artifact.len(),
            mime_type = artifact.mime_type(),
            backend = self.handoff.transcriber_name(),
            "handing off capture"
        );
        self.transcribing = Some(id);
        self.set_state(SessionState::Transcribing);

        let handoff = self.handoff.clone();
        tokio::spawn(async move {
            let outcome = handoff.run(artifact).await;
            mailbox
                .send(Message::HandoffFinished {
                    session: id,
                    outcome,
                })
                .ok();
        });
    }

    fn on_handoff_finished(&mut self, id: u64, outcome: HandoffOutcome) {
        if self.current_state() != SessionState::Transcribing || self.transcribing != Some(id) {
            debug!(session = id, "stale handoff result");
            return;
        }
        self.transcribing = None;
        self.set_state(SessionState::Idle);

        match outcome {
            HandoffOutcome::Transcript(text) => {
                info!(session = id, chars = text.chars().count(), "transcript ready");
                self.listener.on_transcript_ready(&text);
            }
            HandoffOutcome::NoSpeech => {
                info!(session = id, "no speech in transcript");
                self.listener
                    .on_no_speech_detected(NoSpeechReason::ShortTranscript);
            }
            HandoffOutcome::Failed(e) => {
                error!(session = id, error = ?e, "Transcription failed");
                self.listener.on_error(
                    ErrorKind::Transcription,
                    &format!("Could not transcribe audio. Please try again. ({})", e),
                );
            }
        }
    }
}
