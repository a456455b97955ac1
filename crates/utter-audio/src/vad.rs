//! Voice activity detection over a stream of peak amplitudes.
//!
//! The detector owns no clock. Every timestamp is passed in by the caller as
//! an offset from the start of the session, so the same sequence of
//! `(amplitude, now)` pairs always produces the same events.

use std::time::Duration;

use tracing::debug;
use utter_core::{Thresholds, VadEvent};

/// Inspectable detector state. Reset by constructing a new detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VadState {
    pub is_speaking: bool,
    pub speech_started_at: Option<Duration>,
    /// Set only while speaking and the latest frame was below threshold.
    pub silence_started_at: Option<Duration>,
    /// Consecutive above-threshold frames, zeroed by a quiet frame.
    pub sustained_speech_frames: u32,
    /// Longest run of `sustained_speech_frames` seen this session.
    pub longest_speech_run: u32,
    /// Above-threshold frames this session, never reset by quiet frames.
    pub total_speech_frames: u32,
    pub max_volume_observed: f32,
    auto_stop_emitted: bool,
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    thresholds: Thresholds,
    state: VadState,
}

impl VoiceActivityDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: VadState::default(),
        }
    }

    pub fn state(&self) -> &VadState {
        &self.state
    }

    /// Feed one frame's peak amplitude observed at `now`.
    pub fn feed(&mut self, peak_amplitude: f32, now: Duration) -> Option<VadEvent> {
        let state = &mut self.state;
        if peak_amplitude > state.max_volume_observed {
            state.max_volume_observed = peak_amplitude;
        }

        if peak_amplitude > self.thresholds.speech_threshold {
            state.sustained_speech_frames += 1;
            state.longest_speech_run = state.longest_speech_run.max(state.sustained_speech_frames);
            state.total_speech_frames += 1;
            state.silence_started_at = None;
            state.auto_stop_emitted = false;

            if !state.is_speaking {
                state.is_speaking = true;
                state.speech_started_at = Some(now);
                debug!(at_ms = now.as_millis() as u64, peak = peak_amplitude, "speech started");
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        state.sustained_speech_frames = 0;
        if !state.is_speaking {
            return None;
        }

        match state.silence_started_at {
            None => {
                state.silence_started_at = Some(now);
                debug!(at_ms = now.as_millis() as u64, "silence started");
                Some(VadEvent::SilenceStarted)
            }
            Some(since) => {
                let elapsed = now.saturating_sub(since);
                if elapsed > self.thresholds.silence_duration() && !state.auto_stop_emitted {
                    state.auto_stop_emitted = true;
                    debug!(
                        at_ms = now.as_millis() as u64,
                        silent_ms = elapsed.as_millis() as u64,
                        "auto-stop requested"
                    );
                    Some(VadEvent::AutoStopRequested)
                } else {
                    None
                }
            }
        }
    }

    /// How long the utterance ran, from the first speech frame to the start
    /// of the trailing silence (or `now` if still speaking).
    pub fn speech_duration(&self, now: Duration) -> Duration {
        match self.state.speech_started_at {
            Some(start) => self
                .state
                .silence_started_at
                .unwrap_or(now)
                .saturating_sub(start),
            None => Duration::ZERO,
        }
    }

    /// Whether the utterance lasted at least the minimum intentional length.
    pub fn met_min_speech(&self, now: Duration) -> bool {
        self.state.speech_started_at.is_some()
            && self.speech_duration(now) >= self.thresholds.min_speech_duration()
    }

    /// The loudest frame never crossed the speech threshold.
    pub fn too_quiet(&self) -> bool {
        self.state.max_volume_observed < self.thresholds.speech_threshold
    }

    /// Fewer speech frames than the sustained frame count over the whole
    /// session. Pauses between words do not reset the count.
    pub fn short_noise(&self) -> bool {
        self.state.total_speech_frames < self.thresholds.sustained_frames_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(
            Thresholds::default()
                .with_speech_threshold(5.0)
                .with_silence_duration(ms(5000)),
        )
    }

    #[test]
    fn quiet_stream_never_starts_speech() {
        let mut vad = detector();
        for (i, amp) in [0.0, 1.0, 5.0, 4.9, 3.0, 5.0].iter().cycle().take(600).enumerate() {
            assert_eq!(vad.feed(*amp, ms(i as u64 * 16)), None);
        }
        assert!(!vad.state().is_speaking);
        assert_eq!(vad.state().max_volume_observed, 5.0);
        assert_eq!(vad.state().speech_started_at, None);
    }

    #[test]
    fn end_to_end_frame_sequence() {
        let mut vad = detector();
        let amplitudes = [2.0, 2.0, 8.0, 9.0, 10.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        let mut events = Vec::new();
        for (i, amp) in amplitudes.iter().enumerate() {
            let frame = i as u64 + 1;
            if let Some(event) = vad.feed(*amp, ms(frame * 1000)) {
                events.push((frame, event));
            }
        }
        assert_eq!(
            events,
            vec![
                (3, VadEvent::SpeechStarted),
                (6, VadEvent::SilenceStarted),
                (12, VadEvent::AutoStopRequested),
            ]
        );
        assert_eq!(vad.state().max_volume_observed, 10.0);
        assert_eq!(vad.state().longest_speech_run, 3);
    }

    #[test]
    fn auto_stop_fires_once_just_after_window() {
        let mut vad = detector();
        assert_eq!(vad.feed(20.0, ms(0)), Some(VadEvent::SpeechStarted));
        assert_eq!(vad.feed(0.0, ms(100)), Some(VadEvent::SilenceStarted));

        let mut auto_stops = Vec::new();
        for t in 101..=5101 {
            if let Some(event) = vad.feed(0.0, ms(t)) {
                auto_stops.push((t, event));
            }
        }
        assert_eq!(auto_stops, vec![(5101, VadEvent::AutoStopRequested)]);
    }

    #[test]
    fn speech_just_before_window_resets_silence() {
        let mut vad = detector();
        vad.feed(20.0, ms(0));
        assert_eq!(vad.feed(0.0, ms(1000)), Some(VadEvent::SilenceStarted));
        assert_eq!(vad.feed(0.0, ms(3000)), None);
        // 4999ms after silence began
        assert_eq!(vad.feed(20.0, ms(5999)), None);
        assert_eq!(vad.state().silence_started_at, None);
        assert!(vad.state().is_speaking);

        // The old window would have closed here
        assert_eq!(vad.feed(0.0, ms(6001)), Some(VadEvent::SilenceStarted));
        assert_eq!(vad.feed(0.0, ms(7000)), None);
        assert_eq!(vad.feed(0.0, ms(11001)), None);
        assert_eq!(vad.feed(0.0, ms(11002)), Some(VadEvent::AutoStopRequested));
    }

    #[test]
    fn exact_window_does_not_fire() {
        let mut vad = detector();
        vad.feed(20.0, ms(0));
        vad.feed(0.0, ms(1000));
        assert_eq!(vad.feed(0.0, ms(6000)), None);
        assert_eq!(vad.feed(0.0, ms(6001)), Some(VadEvent::AutoStopRequested));
    }

    #[test]
    fn silence_before_speech_is_ignored() {
        let mut vad = detector();
        assert_eq!(vad.feed(0.0, ms(0)), None);
        assert_eq!(vad.feed(0.0, ms(60_000)), None);
        assert_eq!(vad.state().silence_started_at, None);
    }

    #[test]
    fn sustained_frames_count_consecutive_speech() {
        let mut vad = detector();
        for t in 0..4 {
            vad.feed(9.0, ms(t));
        }
        assert_eq!(vad.state().sustained_speech_frames, 4);
        vad.feed(0.0, ms(4));
        assert_eq!(vad.state().sustained_speech_frames, 0);
        vad.feed(9.0, ms(5));
        assert_eq!(vad.state().sustained_speech_frames, 1);
        assert_eq!(vad.state().longest_speech_run, 4);
        assert_eq!(vad.state().total_speech_frames, 5);
        assert!(!vad.short_noise());
    }

    #[test]
    fn choppy_speech_is_not_short_noise() {
        let mut vad = detector();
        let mut t = 0;
        for _ in 0..8 {
            for _ in 0..3 {
                vad.feed(50.0, ms(t));
                t += 100;
            }
            vad.feed(0.0, ms(t));
            t += 100;
        }
        assert_eq!(vad.state().longest_speech_run, 3);
        assert_eq!(vad.state().total_speech_frames, 24);
        assert!(!vad.short_noise());
    }

    #[test]
    fn a_few_blips_are_short_noise() {
        let mut vad = detector();
        vad.feed(50.0, ms(0));
        vad.feed(0.0, ms(100));
        vad.feed(50.0, ms(200));
        vad.feed(50.0, ms(300));
        vad.feed(0.0, ms(400));
        assert_eq!(vad.state().total_speech_frames, 3);
        assert!(vad.short_noise());
    }

    #[test]
    fn speech_duration_measures_until_silence() {
        let mut vad = detector();
        vad.feed(9.0, ms(200));
        assert_eq!(vad.speech_duration(ms(500)), ms(300));
        assert!(!vad.met_min_speech(ms(500)));
        vad.feed(0.0, ms(900));
        assert_eq!(vad.speech_duration(ms(4000)), ms(700));
        assert!(vad.met_min_speech(ms(4000)));
    }
}
