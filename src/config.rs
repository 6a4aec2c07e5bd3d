//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Activity-detection ownership for a session, fixed at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// The host marks start/end of user speech; local silence-dropping is safe.
    #[default]
    PushToTalk,
    /// The remote model runs its own VAD; every captured chunk is forwarded.
    Continuous,
}

impl SessionMode {
    /// Whether remote-side VAD owns activity detection.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous)
    }
}

/// Configuration for the voice session engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Activity-detection mode, threaded into capture and playback.
    pub mode: SessionMode,
    /// Hard session duration cap; expiry forces a disconnect.
    pub max_session_duration: Duration,
    /// Minimum interval between UI-visible transcript publications.
    pub transcript_throttle: Duration,
    /// Grace window after stop-talking before committing the user transcript,
    /// to catch trailing transcript messages.
    pub stop_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::PushToTalk,
            max_session_duration: Duration::from_secs(600),
            transcript_throttle: Duration::from_millis(120),
            stop_grace: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a continuous-mode configuration.
    pub fn continuous() -> Self {
        Self { mode: SessionMode::Continuous, ..Self::default() }
    }

    /// Set the session mode.
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the hard session duration cap.
    pub fn with_max_session_duration(mut self, duration: Duration) -> Self {
        self.max_session_duration = duration;
        self
    }

    /// Set the transcript publish throttle.
    pub fn with_transcript_throttle(mut self, throttle: Duration) -> Self {
        self.transcript_throttle = throttle;
        self
    }

    /// Set the post-stop-talking commit grace window.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}
