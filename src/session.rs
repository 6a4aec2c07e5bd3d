//! Session lifecycle manager.
//!
//! `VoiceSession` is the root of the engine: it performs connection setup
//! (quota check, credential exchange), wires the capture pipeline and
//! playback scheduler around the duplex transport, routes every inbound
//! message through one dispatch point, and guarantees resource release on
//! every exit path through a single idempotent `disconnect`.

use crate::capture::{CaptureDevice, CapturePipeline};
use crate::config::EngineConfig;
use crate::connect::{
    ConnectEndpoint, ConnectRequest, QuotaInfo, SessionIdentity, SessionReadiness, UsageReporter,
};
use crate::error::{Result, VoiceError};
use crate::events::{EngineEvent, InboundEvent, OutboundMessage};
use crate::playback::{ClockFactory, PlaybackScheduler};
use crate::tools::{ConversationStore, ToolBridge, ToolExecutor};
use crate::transcript::{Role, TranscriptAggregator};
use crate::transport::{BoxedTransport, TransportConnector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Disconnect reason used when the duration cap expires.
pub const SESSION_TIMEOUT_REASON: &str = "session-timeout";

/// Disconnect reason used when the host page/application is hidden.
pub const VISIBILITY_REASON: &str = "visibility";

/// Engine status, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session exists.
    Idle,
    /// Connection setup in progress.
    Connecting,
    /// Connected; the user may talk.
    Listening,
    /// Connected; the assistant is rendering audio.
    Speaking,
    /// A fatal error occurred; the host should fall back to non-voice mode.
    Error,
    /// The session was disconnected.
    Closed,
}

/// Resources owned by one live connection.
struct ActiveSession {
    identity: SessionIdentity,
    connection_id: String,
    transport: BoxedTransport,
    capture: Arc<CapturePipeline>,
    playback: Arc<PlaybackScheduler>,
    transcript: Arc<TranscriptAggregator>,
    usage_tracking_id: Option<String>,
    started_at: Instant,
    tasks: Vec<JoinHandle<()>>,
}

/// The real-time voice session engine.
///
/// One engine instance owns at most one active session; the microphone
/// handle, output clock, and duplex connection all belong to it exclusively
/// between `start_talking` and `disconnect`.
pub struct VoiceSession {
    config: EngineConfig,

    // Collaborator seams.
    readiness: Arc<dyn SessionReadiness>,
    connect_endpoint: Arc<dyn ConnectEndpoint>,
    connector: Arc<dyn TransportConnector>,
    device: Arc<dyn CaptureDevice>,
    executor: Arc<dyn ToolExecutor>,
    store: Arc<dyn ConversationStore>,
    usage: Arc<dyn UsageReporter>,
    clock_factory: ClockFactory,

    // Host-visible state.
    status_tx: Arc<watch::Sender<SessionStatus>>,
    level_tx: Arc<watch::Sender<f32>>,
    user_tx: Arc<watch::Sender<String>>,
    assistant_tx: Arc<watch::Sender<String>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    quota: Mutex<Option<QuotaInfo>>,
    quota_exceeded: AtomicBool,

    active: AsyncMutex<Option<ActiveSession>>,
}

impl VoiceSession {
    /// Create a builder.
    pub fn builder() -> VoiceSessionBuilder {
        VoiceSessionBuilder::new()
    }

    // ── Exposed surface ─────────────────────────────────────────────────

    /// Current engine status.
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Watch the engine status.
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Whether a duplex connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.active.lock().await.as_ref().map(|a| a.transport.is_connected()).unwrap_or(false)
    }

    /// Latest input level in `[0, 1]`, for activity meters.
    pub fn audio_level(&self) -> f32 {
        *self.level_tx.borrow()
    }

    /// Watch the input level.
    pub fn audio_level_watch(&self) -> watch::Receiver<f32> {
        self.level_tx.subscribe()
    }

    /// Live (uncommitted) user transcript.
    pub fn live_user_transcript(&self) -> String {
        self.user_tx.borrow().clone()
    }

    /// Live (uncommitted) assistant transcript.
    pub fn live_assistant_transcript(&self) -> String {
        self.assistant_tx.borrow().clone()
    }

    /// Watch a live transcript.
    pub fn transcript_watch(&self, role: Role) -> watch::Receiver<String> {
        match role {
            Role::User => self.user_tx.subscribe(),
            Role::Assistant => self.assistant_tx.subscribe(),
        }
    }

    /// Most recent quota snapshot from the connect endpoint.
    pub fn quota(&self) -> Option<QuotaInfo> {
        self.quota.lock().clone()
    }

    /// Whether the last connect attempt was rejected for lack of quota.
    pub fn quota_exceeded(&self) -> bool {
        self.quota_exceeded.load(Ordering::SeqCst)
    }

    /// Take the engine event receiver. Yields `Some` only on the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }

    // ── Lifecycle operations ────────────────────────────────────────────

    /// Connect and begin a voice session.
    ///
    /// A second call while already connected is a no-op returning the
    /// existing connection. On quota rejection the engine transitions to
    /// `Error`, sets `quota_exceeded`, exposes the returned snapshot, and
    /// does not retry.
    pub async fn start_talking(self: &Arc<Self>) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            // Already connected: re-arm the talk gate so the next turn's
            // audio flows after a previous stop_talking cleared it.
            if !self.config.mode.is_continuous() {
                session.capture.set_talking(true);
            }
            tracing::debug!("start_talking while connected, keeping existing session");
            return Ok(());
        }

        self.quota_exceeded.store(false, Ordering::SeqCst);
        self.set_status(SessionStatus::Connecting);

        match self.establish().await {
            Ok(session) => {
                if !self.config.mode.is_continuous() {
                    session.capture.set_talking(true);
                }
                tracing::info!(
                    session_id = %session.identity.session_id,
                    connection_id = %session.connection_id,
                    mode = ?self.config.mode,
                    "voice session connected"
                );
                *active = Some(session);
                self.set_status(SessionStatus::Listening);
                Ok(())
            }
            Err(e) => {
                if let VoiceError::QuotaExceeded(quota) = &e {
                    *self.quota.lock() = Some(quota.clone());
                    self.quota_exceeded.store(true, Ordering::SeqCst);
                } else {
                    let reason = match &e {
                        VoiceError::DeviceUnavailable(_) => "device-unavailable",
                        _ => "connection-failed",
                    };
                    let _ =
                        self.events_tx.send(EngineEvent::Fallback { reason: reason.to_string() });
                }
                self.set_status(SessionStatus::Error);
                tracing::warn!(error = %e, "voice session failed to start");
                Err(e)
            }
        }
    }

    /// Signal end of user activity (push-to-talk release).
    ///
    /// Sends the end-of-activity marker, then commits the pending user
    /// transcript after a short grace window that catches trailing
    /// transcript messages. No-op in continuous mode or when disconnected.
    pub async fn stop_talking(&self) -> Result<()> {
        let (transcript, events_tx, grace) = {
            let guard = self.active.lock().await;
            let Some(active) = guard.as_ref() else {
                return Ok(());
            };
            if self.config.mode.is_continuous() {
                return Ok(());
            }
            active.capture.set_talking(false);
            active.transport.send(OutboundMessage::ActivityEnd).await?;
            (Arc::clone(&active.transcript), self.events_tx.clone(), self.config.stop_grace)
        };

        tokio::time::sleep(grace).await;
        if let Some(commit) = transcript.commit_pending(Role::User) {
            let _ = events_tx.send(EngineEvent::UserMessage { text: commit.text });
        }
        Ok(())
    }

    /// End the session and release every owned resource.
    ///
    /// The single cancellation point: safe to call from any state,
    /// including mid-connect and mid-tool-call, and idempotent — a second
    /// call neither double-releases resources nor double-reports usage.
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        let mut guard = self.active.lock().await;
        let Some(active) = guard.take() else {
            tracing::debug!(reason, "disconnect with no active session");
            return Ok(());
        };

        for task in &active.tasks {
            task.abort();
        }
        self.device.stop().await;
        active.playback.release();
        active.transcript.reset();
        let _ = active.transport.close().await;
        self.level_tx.send_replace(0.0);

        let duration = active.started_at.elapsed();
        tracing::info!(
            reason,
            session_id = %active.identity.session_id,
            connection_id = %active.connection_id,
            duration_secs = duration.as_secs_f64(),
            "voice session ended"
        );

        if let Some(tracking_id) = active.usage_tracking_id {
            let usage = Arc::clone(&self.usage);
            tokio::spawn(async move {
                if let Err(e) = usage.report_session_end(&tracking_id).await {
                    tracing::warn!(error = %e, "failed to report session usage");
                }
            });
        }

        self.set_status(SessionStatus::Closed);
        Ok(())
    }

    /// The host page/application became hidden: stop talking, then
    /// disconnect so the session does not keep consuming quota.
    pub async fn handle_visibility_hidden(&self) -> Result<()> {
        if self.active.lock().await.is_none() {
            return Ok(());
        }
        tracing::info!("host became hidden, ending voice session");
        let _ = self.stop_talking().await;
        self.disconnect(VISIBILITY_REASON).await
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn set_status(&self, status: SessionStatus) {
        tracing::debug!(status = ?status, "status transition");
        // send_replace: the value must land even before any host subscribes.
        self.status_tx.send_replace(status);
    }

    /// Acquire identity, credentials, transport, and device, and spawn the
    /// session's worker tasks. Caller holds the `active` lock.
    async fn establish(self: &Arc<Self>) -> Result<ActiveSession> {
        let identity = self.readiness.ensure_ready().await?;
        let request = ConnectRequest {
            project_id: identity.project_id.clone(),
            session_id: identity.session_id.clone(),
            continuous_mode: self.config.mode.is_continuous(),
        };
        let response = self.connect_endpoint.connect(request).await?;
        if let Some(quota) = &response.quota {
            *self.quota.lock() = Some(quota.clone());
        }

        let transport =
            self.connector.open(&response.credential, &response.transport_config).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let capture = CapturePipeline::new(self.config.mode, out_tx, Arc::clone(&self.level_tx));
        if let Err(e) = self.device.start(capture.sink()).await {
            let _ = transport.close().await;
            return Err(e);
        }

        let playback = Arc::new(PlaybackScheduler::new(Arc::clone(&self.clock_factory)));
        let transcript = Arc::new(TranscriptAggregator::new(
            self.config.transcript_throttle,
            Arc::clone(&self.user_tx),
            Arc::clone(&self.assistant_tx),
        ));
        let bridge = Arc::new(ToolBridge::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.store),
            self.events_tx.clone(),
        ));

        let connection_id = uuid::Uuid::new_v4().to_string();
        let mut tasks = Vec::new();

        // Outbound pump: preserves capture order onto the transport.
        tasks.push(tokio::spawn(pump_outbound(out_rx, Arc::clone(&transport))));

        // Inbound dispatch loop.
        tasks.push(tokio::spawn(run_inbound_loop(InboundContext {
            transport: Arc::clone(&transport),
            playback: Arc::clone(&playback),
            transcript: Arc::clone(&transcript),
            bridge,
            identity: identity.clone(),
            status_tx: Arc::clone(&self.status_tx),
            events_tx: self.events_tx.clone(),
        })));

        // Hard session-duration cap.
        let weak = Arc::downgrade(self);
        let events_tx = self.events_tx.clone();
        let cap = self.config.max_session_duration;
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(cap).await;
            tracing::info!("session reached its maximum duration, forcing disconnect");
            let _ = events_tx
                .send(EngineEvent::Fallback { reason: SESSION_TIMEOUT_REASON.to_string() });
            if let Some(session) = weak.upgrade() {
                // Detached: disconnect aborts the timer's own task handle.
                tokio::spawn(async move {
                    let _ = session.disconnect(SESSION_TIMEOUT_REASON).await;
                });
            }
        }));

        Ok(ActiveSession {
            identity,
            connection_id,
            transport,
            capture,
            playback,
            transcript,
            usage_tracking_id: response.usage_tracking_id,
            started_at: Instant::now(),
            tasks,
        })
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("mode", &self.config.mode)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn pump_outbound(
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    transport: BoxedTransport,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = transport.send(message).await {
            tracing::warn!(error = %e, "failed to forward outbound message");
            break;
        }
    }
}

/// Everything the inbound loop needs, bundled so the task owns its state
/// explicitly instead of capturing it from an enclosing scope.
struct InboundContext {
    transport: BoxedTransport,
    playback: Arc<PlaybackScheduler>,
    transcript: Arc<TranscriptAggregator>,
    bridge: Arc<ToolBridge>,
    identity: SessionIdentity,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

async fn run_inbound_loop(ctx: InboundContext) {
    loop {
        match ctx.transport.next_event().await {
            Some(Ok(event)) => {
                if !dispatch_event(&ctx, event) {
                    break;
                }
            }
            Some(Err(e)) if e.is_fatal() => {
                tracing::warn!(error = %e, "duplex stream error");
                ctx.status_tx.send_replace(SessionStatus::Error);
                let _ = ctx
                    .events_tx
                    .send(EngineEvent::Fallback { reason: "connection-error".to_string() });
                break;
            }
            Some(Err(e)) => {
                // One bad message is not a dead connection.
                tracing::warn!(error = %e, "dropping undecodable stream message");
            }
            None => {
                tracing::debug!("duplex stream closed");
                break;
            }
        }
    }
}

/// Route one inbound event to its consumer. Returns `false` when the loop
/// should stop.
fn dispatch_event(ctx: &InboundContext, event: InboundEvent) -> bool {
    match event {
        InboundEvent::SessionReady => {
            tracing::debug!("remote session ready");
        }
        InboundEvent::AudioDelta { data, mime_type } => {
            if let Err(e) = ctx.playback.enqueue(&data, &mime_type) {
                tracing::warn!(error = %e, "dropping undecodable audio chunk");
            } else if *ctx.status_tx.borrow() == SessionStatus::Listening {
                ctx.status_tx.send_replace(SessionStatus::Speaking);
            }
        }
        InboundEvent::TranscriptDelta { role, text, finished } => {
            if let Some(commit) = ctx.transcript.apply(role, &text, finished) {
                let event = match commit.role {
                    Role::User => EngineEvent::UserMessage { text: commit.text },
                    Role::Assistant => EngineEvent::AssistantMessage { text: commit.text },
                };
                let _ = ctx.events_tx.send(event);
            }
        }
        InboundEvent::ToolCallRequest { calls } => {
            // Tool round trips must not block audio: run beside the loop so
            // playback keeps scheduling while the endpoint is in flight.
            let bridge = Arc::clone(&ctx.bridge);
            let transport = Arc::clone(&ctx.transport);
            let identity = ctx.identity.clone();
            let latest = ctx.transcript.latest_user_utterance();
            tokio::spawn(async move {
                if let Err(e) =
                    bridge.handle_tool_calls(calls, &identity, latest, &transport).await
                {
                    tracing::warn!(error = %e, "tool bridge failed to respond");
                }
            });
        }
        InboundEvent::TurnComplete => {
            if *ctx.status_tx.borrow() == SessionStatus::Speaking {
                ctx.status_tx.send_replace(SessionStatus::Listening);
            }
        }
        InboundEvent::Interrupted => {
            // Barge-in: stale assistant audio must not play over the user.
            ctx.playback.flush();
            if *ctx.status_tx.borrow() == SessionStatus::Speaking {
                ctx.status_tx.send_replace(SessionStatus::Listening);
            }
        }
        InboundEvent::Error { error } => {
            tracing::warn!(code = ?error.code, message = %error.message, "remote session error");
            ctx.status_tx.send_replace(SessionStatus::Error);
            let _ =
                ctx.events_tx.send(EngineEvent::Fallback { reason: "remote-error".to_string() });
            return false;
        }
        InboundEvent::Unknown => {
            tracing::debug!("ignoring unknown inbound event");
        }
    }
    true
}

// ── Builder ─────────────────────────────────────────────────────────────

/// Builder for [`VoiceSession`].
pub struct VoiceSessionBuilder {
    config: EngineConfig,
    readiness: Option<Arc<dyn SessionReadiness>>,
    connect_endpoint: Option<Arc<dyn ConnectEndpoint>>,
    connector: Option<Arc<dyn TransportConnector>>,
    device: Option<Arc<dyn CaptureDevice>>,
    executor: Option<Arc<dyn ToolExecutor>>,
    store: Option<Arc<dyn ConversationStore>>,
    usage: Option<Arc<dyn UsageReporter>>,
    clock_factory: Option<ClockFactory>,
}

impl Default for VoiceSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSessionBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            readiness: None,
            connect_endpoint: None,
            connector: None,
            device: None,
            executor: None,
            store: None,
            usage: None,
            clock_factory: None,
        }
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the session-readiness provider.
    pub fn readiness(mut self, readiness: Arc<dyn SessionReadiness>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// Set the connect endpoint.
    pub fn connect_endpoint(mut self, endpoint: Arc<dyn ConnectEndpoint>) -> Self {
        self.connect_endpoint = Some(endpoint);
        self
    }

    /// Set the transport connector.
    pub fn transport_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the capture device.
    pub fn capture_device(mut self, device: Arc<dyn CaptureDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the tool-execution endpoint.
    pub fn tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the conversation-persistence endpoint.
    pub fn conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the usage-reporting endpoint.
    pub fn usage_reporter(mut self, usage: Arc<dyn UsageReporter>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Set the output clock factory.
    pub fn clock_factory(mut self, factory: ClockFactory) -> Self {
        self.clock_factory = Some(factory);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Arc<VoiceSession>> {
        let readiness =
            self.readiness.ok_or_else(|| VoiceError::config("readiness provider is required"))?;
        let connect_endpoint = self
            .connect_endpoint
            .ok_or_else(|| VoiceError::config("connect endpoint is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| VoiceError::config("transport connector is required"))?;
        let device =
            self.device.ok_or_else(|| VoiceError::config("capture device is required"))?;
        let executor =
            self.executor.ok_or_else(|| VoiceError::config("tool executor is required"))?;
        let store =
            self.store.ok_or_else(|| VoiceError::config("conversation store is required"))?;
        let usage = self.usage.ok_or_else(|| VoiceError::config("usage reporter is required"))?;
        let clock_factory =
            self.clock_factory.ok_or_else(|| VoiceError::config("clock factory is required"))?;

        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (level_tx, _) = watch::channel(0.0f32);
        let (user_tx, _) = watch::channel(String::new());
        let (assistant_tx, _) = watch::channel(String::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(VoiceSession {
            config: self.config,
            readiness,
            connect_endpoint,
            connector,
            device,
            executor,
            store,
            usage,
            clock_factory,
            status_tx: Arc::new(status_tx),
            level_tx: Arc::new(level_tx),
            user_tx: Arc::new(user_tx),
            assistant_tx: Arc::new(assistant_tx),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            quota: Mutex::new(None),
            quota_exceeded: AtomicBool::new(false),
            active: AsyncMutex::new(None),
        }))
    }
}
