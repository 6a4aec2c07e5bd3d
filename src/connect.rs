//! Collaborator seams for session setup and teardown reporting.
//!
//! These traits only describe the interface boundary: how identity is
//! obtained, how the connect endpoint is asked for a quota check plus a
//! short-lived credential, and how usage is reported on disconnect. The
//! engine does not care how any of them are implemented.

use crate::error::Result;
use crate::transport::TransportConfig;
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Conversation identity for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Owning project.
    pub project_id: String,
    /// Logically-scoped conversation id.
    pub session_id: String,
}

/// Remaining-quota snapshot returned by the connect endpoint.
///
/// Read-only on the client: exceeding quota is discovered via a rejected
/// connect call, never computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    /// Voice minutes remaining today.
    pub remaining_minutes: u32,
    /// Daily cap in minutes.
    pub daily_quota_minutes: u32,
    /// Minutes used today.
    pub used_minutes: u32,
    /// Plan tier name.
    pub plan_tier: String,
}

/// Supplies conversation identity; may itself perform network calls.
#[async_trait]
pub trait SessionReadiness: Send + Sync {
    /// Ensure a conversation exists and return its identity.
    async fn ensure_ready(&self) -> Result<SessionIdentity>;
}

/// Request body for the connect endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Owning project.
    pub project_id: String,
    /// Conversation id.
    pub session_id: String,
    /// Whether the session runs in continuous (remote VAD) mode.
    pub continuous_mode: bool,
}

/// Successful connect response: quota check passed, credential issued.
pub struct ConnectResponse {
    /// Short-lived access credential for the duplex transport.
    pub credential: SecretString,
    /// Model identifier the session was provisioned for.
    pub model_id: String,
    /// Transport settings to open the connection with.
    pub transport_config: TransportConfig,
    /// Handle for usage reporting on disconnect, if tracking is enabled.
    pub usage_tracking_id: Option<String>,
    /// Refreshed quota snapshot.
    pub quota: Option<QuotaInfo>,
}

impl std::fmt::Debug for ConnectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectResponse")
            .field("model_id", &self.model_id)
            .field("usage_tracking_id", &self.usage_tracking_id)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

/// Performs the quota check and credential exchange.
///
/// Quota rejection surfaces as [`crate::VoiceError::QuotaExceeded`] carrying
/// the endpoint's snapshot; the engine does not retry it.
#[async_trait]
pub trait ConnectEndpoint: Send + Sync {
    /// Request session credentials.
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse>;
}

/// Best-effort usage reporting on session end.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    /// Report that the tracked session ended. Fire-and-forget; failures are
    /// logged by the caller, never surfaced.
    async fn report_session_end(&self, usage_tracking_id: &str) -> Result<()>;
}
