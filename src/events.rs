//! Message types for the duplex session.
//!
//! Inbound and outbound messages are tagged unions so that the transcript
//! aggregator, playback scheduler, and tool bridge can consume the same
//! inbound stream independently through one dispatch point.
//!
//! Audio payloads are raw bytes (`Bytes`) internally and base64 on the wire;
//! the serde helpers below handle the boundary so consumers never see the
//! text encoding.

use crate::transcript::Role;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Custom serde for base64-encoded audio ───────────────────────────────

fn deserialize_audio_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use base64::Engine;
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(&s)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

fn serialize_audio_bytes<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use base64::Engine;
    let s = base64::engine::general_purpose::STANDARD.encode(bytes);
    serializer.serialize_str(&s)
}

// ── Inbound events ──────────────────────────────────────────────────────

/// Events received from the remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    /// The remote session finished its setup and is ready for input.
    #[serde(rename = "session.ready")]
    SessionReady,

    /// A partial (or final) transcript for one speaker role.
    ///
    /// Partials may arrive as deltas or as full-so-far strings; the
    /// transcript aggregator tolerates both.
    #[serde(rename = "transcript.delta")]
    TranscriptDelta {
        /// Which speaker this transcript belongs to.
        role: Role,
        /// Partial transcript text.
        text: String,
        /// Whether this is the finishing update for the turn.
        #[serde(default)]
        finished: bool,
    },

    /// A chunk of assistant output audio.
    #[serde(rename = "audio.delta")]
    AudioDelta {
        /// Raw PCM16 bytes (base64 on the wire).
        #[serde(
            serialize_with = "serialize_audio_bytes",
            deserialize_with = "deserialize_audio_bytes"
        )]
        data: Bytes,
        /// Format tag, e.g. `audio/pcm;rate=24000`.
        mime_type: String,
    },

    /// The model requests one or more tool invocations.
    #[serde(rename = "tool.call")]
    ToolCallRequest {
        /// The pending calls, each answered exactly once.
        calls: Vec<PendingToolCall>,
    },

    /// The assistant finished its turn.
    #[serde(rename = "turn.complete")]
    TurnComplete,

    /// The user started talking over the assistant; stale playback must stop.
    #[serde(rename = "interrupted")]
    Interrupted,

    /// The remote side reported an error.
    #[serde(rename = "error")]
    Error {
        /// Error details.
        error: ErrorInfo,
    },

    /// Unknown event type (forward compatibility).
    #[serde(other)]
    Unknown,
}

/// Error information from the remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

// ── Outbound messages ───────────────────────────────────────────────────

/// Messages sent from the engine into the duplex session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A chunk of realtime input audio.
    #[serde(rename = "input_audio.append")]
    RealtimeAudio {
        /// Raw PCM16 bytes (base64 on the wire).
        #[serde(
            serialize_with = "serialize_audio_bytes",
            deserialize_with = "deserialize_audio_bytes"
        )]
        data: Bytes,
        /// Format tag, e.g. `audio/pcm;rate=16000`.
        mime_type: String,
    },

    /// End-of-activity marker (push-to-talk release).
    #[serde(rename = "input_audio.activity_end")]
    ActivityEnd,

    /// Result of a tool invocation, matched to its originating call.
    #[serde(rename = "tool.response")]
    FunctionResponse {
        /// Originating call id.
        id: String,
        /// Tool name.
        name: String,
        /// `{"output": ...}` or `{"error": ...}`.
        response: Value,
    },
}

// ── Tool calls ──────────────────────────────────────────────────────────

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolCall {
    /// Unique call id (used to match the response).
    pub id: String,
    /// Tool/function name.
    pub name: String,
    /// Arguments as JSON.
    #[serde(default)]
    pub args: Value,
}

/// Terminal result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Originating call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome.
    pub fn ok(id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self { id: id.into(), name: name.into(), output: Some(output), error: None }
    }

    /// A failed outcome.
    pub fn failed(
        id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), name: name.into(), output: None, error: Some(error.into()) }
    }

    /// The function-response body for this outcome.
    pub fn response_body(&self) -> Value {
        match (&self.output, &self.error) {
            (Some(output), _) => serde_json::json!({ "output": output }),
            (None, Some(error)) => serde_json::json!({ "error": error }),
            (None, None) => serde_json::json!({ "output": Value::Null }),
        }
    }
}

// ── Engine surface events ───────────────────────────────────────────────

/// Events the engine delivers to its host.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A user turn was committed.
    UserMessage {
        /// Final transcript text.
        text: String,
    },
    /// An assistant turn was committed.
    AssistantMessage {
        /// Final transcript text.
        text: String,
    },
    /// A tool invocation started (for UI/telemetry).
    ToolStarted {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A tool invocation finished.
    ToolResult {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Output on success.
        output: Option<Value>,
        /// Error message on failure.
        error: Option<String>,
    },
    /// Non-fatal advisory the host may surface (session continues).
    Advisory {
        /// Advisory message.
        message: String,
    },
    /// Fatal condition; the host should switch to a non-voice mode.
    Fallback {
        /// Machine-readable reason, e.g. `session-timeout`.
        reason: String,
    },
}
