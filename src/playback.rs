//! Playback scheduler: gap-free rendering of discrete incoming frames.
//!
//! Frames are scheduled back-to-back on an output clock owned by the
//! platform's audio timing domain. The clock is created lazily at the first
//! frame's declared rate and recreated if a later frame declares a different
//! rate (rate changes happen at turn boundaries, so the small gap a
//! recreation causes is acceptable).

use crate::audio::{self, AudioFrame};
use crate::error::{Result, VoiceError};
use parking_lot::Mutex;
use std::sync::Arc;

/// The platform audio-output timing domain.
///
/// Implementations own buffer playback; the scheduler only decides start
/// times. All times are in seconds on the clock's own timeline.
pub trait OutputClock: Send + Sync {
    /// Current time on the clock's timeline.
    fn now(&self) -> f64;

    /// The rate the clock was created for.
    fn sample_rate(&self) -> u32;

    /// Schedule a frame's buffer to start playing at `at`.
    fn schedule(&self, frame: AudioFrame, at: f64);

    /// Immediately stop every scheduled and playing buffer.
    fn stop_all(&self);
}

/// Factory creating an output clock for a given sample rate.
pub type ClockFactory = Arc<dyn Fn(u32) -> Box<dyn OutputClock> + Send + Sync>;

struct SchedulerState {
    clock: Option<Box<dyn OutputClock>>,
    next_start: f64,
}

/// Schedules decoded frames for ordered, back-to-back playback.
pub struct PlaybackScheduler {
    factory: ClockFactory,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    /// Create a scheduler; the clock is not created until the first frame.
    pub fn new(factory: ClockFactory) -> Self {
        Self { factory, state: Mutex::new(SchedulerState { clock: None, next_start: 0.0 }) }
    }

    /// Decode one incoming chunk and schedule it after everything already
    /// queued, never before `now`.
    pub fn enqueue(&self, data: &[u8], mime_type: &str) -> Result<()> {
        let rate = audio::rate_from_mime(mime_type);
        let frame = AudioFrame::from_le_bytes(data, rate)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let rate_matches =
            state.clock.as_ref().map(|c| c.sample_rate() == rate).unwrap_or(false);
        if !rate_matches {
            if let Some(old) = state.clock.take() {
                tracing::debug!(
                    old_rate = old.sample_rate(),
                    new_rate = rate,
                    "output rate changed, recreating clock"
                );
                old.stop_all();
            }
            state.clock = Some((self.factory)(rate));
            state.next_start = 0.0;
        }
        let Some(clock) = state.clock.as_ref() else {
            return Err(VoiceError::protocol("output clock missing after creation"));
        };

        let now = clock.now();
        let start = if state.next_start > now { state.next_start } else { now };
        let duration = frame.duration_secs();
        clock.schedule(frame, start);
        state.next_start = start + duration;
        Ok(())
    }

    /// Barge-in: stop every active buffer and reset the timeline to now.
    pub fn flush(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(clock) = state.clock.as_ref() {
            clock.stop_all();
            let now = clock.now();
            state.next_start = now;
        }
    }

    /// Drop the output clock entirely (session teardown).
    pub fn release(&self) {
        let mut guard = self.state.lock();
        if let Some(clock) = guard.clock.take() {
            clock.stop_all();
        }
        guard.next_start = 0.0;
    }

    /// Whether a clock has been created yet.
    pub fn has_clock(&self) -> bool {
        self.state.lock().clock.is_some()
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PlaybackScheduler")
            .field("has_clock", &state.clock.is_some())
            .field("next_start", &state.next_start)
            .finish()
    }
}
