//! # voice-session
//!
//! Real-time voice session engine: full-duplex audio conversation with an
//! AI assistant over a streaming transport, with live transcription and
//! mid-conversation tool execution.
//!
//! ## Architecture
//!
//! ```text
//!   microphone ──► CapturePipeline ──► OutboundMessage ──► RealtimeTransport
//!                       │ (gate, frame, level)                    │
//!                       ▼                                         ▼
//!                 audio_level watch                        InboundEvent
//!                                                               │
//!            ┌──────────────────┬───────────────────────────────┤
//!            ▼                  ▼                               ▼
//!    PlaybackScheduler   TranscriptAggregator              ToolBridge
//!      (gapless audio)     (commit + live watch)         (exec + respond)
//! ```
//!
//! All of it is owned by [`VoiceSession`], which enforces the single-session
//! invariant and guarantees that every resource (microphone, output clock,
//! connection) is released on disconnect, timeout, or error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voice_session::{VoiceSession, EngineConfig, SessionMode};
//!
//! let session = VoiceSession::builder()
//!     .config(EngineConfig::default().with_mode(SessionMode::PushToTalk))
//!     .readiness(readiness)
//!     .connect_endpoint(endpoint)
//!     .transport_connector(connector)
//!     .capture_device(microphone)
//!     .tool_executor(executor)
//!     .conversation_store(store)
//!     .usage_reporter(usage)
//!     .clock_factory(clock_factory)
//!     .build()?;
//!
//! session.start_talking().await?;
//! // ... user speaks, assistant replies ...
//! session.stop_talking().await?;
//! session.disconnect("user-exit").await?;
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod connect;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;

pub use audio::{
    AudioFormat, AudioFrame, FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, SILENCE_RMS,
};
pub use capture::{CaptureDevice, CapturePipeline, CaptureSink};
pub use config::{EngineConfig, SessionMode};
pub use connect::{
    ConnectEndpoint, ConnectRequest, ConnectResponse, QuotaInfo, SessionIdentity,
    SessionReadiness, UsageReporter,
};
pub use error::{Result, VoiceError};
pub use events::{
    EngineEvent, ErrorInfo, InboundEvent, OutboundMessage, PendingToolCall, ToolOutcome,
};
pub use playback::{ClockFactory, OutputClock, PlaybackScheduler};
pub use session::{
    SESSION_TIMEOUT_REASON, SessionStatus, VISIBILITY_REASON, VoiceSession, VoiceSessionBuilder,
};
pub use tools::{ConversationStore, TOOL_DEGRADED_MESSAGE, ToolBridge, ToolExecutor};
pub use transcript::{Role, TranscriptAggregator, TranscriptCommit};
pub use transport::{
    BoxedTransport, RealtimeTransport, RealtimeTransportExt, TransportConfig, TransportConnector,
};
