//! Tool-call bridge: mid-session tool invocations without breaking audio.
//!
//! The model requests tool calls over the duplex stream; the bridge runs
//! them through an external execution endpoint and feeds structured results
//! back into the session. Bridge errors degrade functionality, they never
//! terminate the session.

use crate::connect::SessionIdentity;
use crate::error::Result;
use crate::events::{EngineEvent, OutboundMessage, PendingToolCall, ToolOutcome};
use crate::transport::BoxedTransport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Advisory shown when the tool batch itself cannot be executed.
pub const TOOL_DEGRADED_MESSAGE: &str = "tool execution failed, continuing in reduced mode";

/// External tool-execution endpoint.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a batch of calls with session identity and the latest user
    /// utterance as context. One outcome per call is expected.
    async fn execute_batch(
        &self,
        calls: &[PendingToolCall],
        identity: &SessionIdentity,
        latest_user_message: Option<&str>,
    ) -> Result<Vec<ToolOutcome>>;
}

/// Conversation-persistence endpoint for tool results.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a tool-result message to the conversation record.
    /// Best-effort; callers log and continue on failure.
    async fn append_tool_result(
        &self,
        identity: &SessionIdentity,
        outcome: &ToolOutcome,
    ) -> Result<()>;
}

/// Dispatches tool-call requests and returns results into the session.
pub struct ToolBridge {
    executor: Arc<dyn ToolExecutor>,
    store: Arc<dyn ConversationStore>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ToolBridge {
    /// Create a bridge.
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        store: Arc<dyn ConversationStore>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self { executor, store, events }
    }

    /// Handle one batch of pending calls. Every call receives exactly one
    /// terminal function-response, success or error.
    pub async fn handle_tool_calls(
        &self,
        calls: Vec<PendingToolCall>,
        identity: &SessionIdentity,
        latest_user_message: Option<String>,
        transport: &BoxedTransport,
    ) -> Result<()> {
        if calls.is_empty() {
            return Ok(());
        }

        for call in &calls {
            tracing::info!(tool = %call.name, call_id = %call.id, "tool call started");
            let _ = self
                .events
                .send(EngineEvent::ToolStarted { id: call.id.clone(), name: call.name.clone() });
        }

        let outcomes = match self
            .executor
            .execute_batch(&calls, identity, latest_user_message.as_deref())
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                // The batch failed wholesale. Answer every call with an
                // error so none is left dangling, tell the host, and keep
                // the session alive.
                tracing::warn!(error = %e, "tool batch execution failed");
                let _ = self.events.send(EngineEvent::Advisory {
                    message: TOOL_DEGRADED_MESSAGE.to_string(),
                });
                calls
                    .iter()
                    .map(|call| {
                        ToolOutcome::failed(call.id.clone(), call.name.clone(), e.to_string())
                    })
                    .collect()
            }
        };

        for call in &calls {
            let outcome = outcomes.iter().find(|o| o.id == call.id).cloned().unwrap_or_else(|| {
                ToolOutcome::failed(
                    call.id.clone(),
                    call.name.clone(),
                    format!("no result returned for tool '{}'", call.name),
                )
            });

            transport
                .send(OutboundMessage::FunctionResponse {
                    id: outcome.id.clone(),
                    name: outcome.name.clone(),
                    response: outcome.response_body(),
                })
                .await?;

            match &outcome.error {
                None => tracing::info!(tool = %outcome.name, call_id = %outcome.id, "tool call succeeded"),
                Some(err) => {
                    tracing::warn!(tool = %outcome.name, call_id = %outcome.id, error = %err, "tool call failed")
                }
            }
            let _ = self.events.send(EngineEvent::ToolResult {
                id: outcome.id.clone(),
                name: outcome.name.clone(),
                output: outcome.output.clone(),
                error: outcome.error.clone(),
            });

            // Persistence is fire-and-forget: it must never block or fail
            // the voice flow.
            let store = Arc::clone(&self.store);
            let identity = identity.clone();
            tokio::spawn(async move {
                if let Err(e) = store.append_tool_result(&identity, &outcome).await {
                    tracing::warn!(error = %e, tool = %outcome.name, "failed to persist tool result");
                }
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge").finish_non_exhaustive()
    }
}
