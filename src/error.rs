//! Error types for the voice session engine.

use crate::connect::QuotaInfo;
use thiserror::Error;

/// Result type for voice session operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Errors that can occur during a voice session.
///
/// The taxonomy maps directly onto the engine's propagation policy:
/// device/connection/timeout errors are fatal to the session and surface a
/// fallback to the host, tool errors degrade the session without ending it,
/// malformed messages are dropped individually, and persistence errors are
/// logged and absorbed. [`VoiceError::is_fatal`] encodes the split.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone could not be acquired (permission denied or no device).
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The connect endpoint rejected the session for lack of quota.
    /// Carries the quota snapshot returned by the endpoint.
    #[error("voice quota exceeded: {} of {} daily minutes used", .0.used_minutes, .0.daily_quota_minutes)]
    QuotaExceeded(QuotaInfo),

    /// Transport open or runtime failure.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The tool-execution endpoint failed. Recoverable; the session continues.
    #[error("tool execution error: {0}")]
    ToolExecutionError(String),

    /// Conversation persistence failed. Logged, never surfaced to the host.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The session hit its maximum duration and was force-disconnected.
    #[error("session reached its maximum duration")]
    SessionTimeout,

    /// Malformed message or payload on the duplex stream.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl VoiceError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new tool execution error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolExecutionError(msg.into())
    }

    /// Create a new persistence error.
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::PersistenceError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether this error ends the session (as opposed to degrading it).
    ///
    /// Tool and persistence failures degrade the session; a malformed
    /// message or payload drops that message only. Device, connection,
    /// quota, and timeout errors end the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ToolExecutionError(_)
                | Self::PersistenceError(_)
                | Self::ProtocolError(_)
                | Self::SerializationError(_)
        )
    }
}
