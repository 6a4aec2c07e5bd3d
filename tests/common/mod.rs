//! Channel-backed fakes for every collaborator seam, plus a harness that
//! wires a full engine out of them.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use voice_session::{
    AudioFrame, BoxedTransport, CaptureDevice, CaptureSink, ClockFactory, ConnectEndpoint,
    ConnectRequest, ConnectResponse, ConversationStore, EngineConfig, EngineEvent, InboundEvent,
    OutboundMessage, OutputClock, PendingToolCall, QuotaInfo, RealtimeTransport, Result,
    SessionIdentity, SessionReadiness, ToolExecutor, ToolOutcome, TransportConfig,
    TransportConnector, UsageReporter, VoiceError, VoiceSession,
};

// ── Transport ───────────────────────────────────────────────────────────

/// In-memory duplex transport: the test pushes inbound events through a
/// channel and inspects everything the engine sent.
pub struct FakeTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<InboundEvent>>>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<InboundEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            inbox: tokio::sync::Mutex::new(rx),
        });
        (transport, tx)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Mark the transport usable again after a close.
    pub fn reopen(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(VoiceError::connection("transport closed"));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn next_event(&self) -> Option<Result<InboundEvent>> {
        self.inbox.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector(pub Arc<FakeTransport>);

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn open(
        &self,
        _credential: &SecretString,
        _config: &TransportConfig,
    ) -> Result<BoxedTransport> {
        Ok(Arc::clone(&self.0) as BoxedTransport)
    }
}

// ── Capture device ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDevice {
    pub sink: Mutex<Option<CaptureSink>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl FakeDevice {
    pub fn feed(&self, samples: &[f32], rate: u32) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(samples, rate);
        }
    }
}

#[async_trait]
impl CaptureDevice for FakeDevice {
    async fn start(&self, sink: CaptureSink) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(VoiceError::device("microphone busy"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = None;
    }
}

// ── Connect plane ───────────────────────────────────────────────────────

pub struct FakeReadiness;

#[async_trait]
impl SessionReadiness for FakeReadiness {
    async fn ensure_ready(&self) -> Result<SessionIdentity> {
        Ok(SessionIdentity { project_id: "proj-1".to_string(), session_id: "sess-1".to_string() })
    }
}

pub fn sample_quota(remaining: u32) -> QuotaInfo {
    QuotaInfo {
        remaining_minutes: remaining,
        daily_quota_minutes: 60,
        used_minutes: 60 - remaining,
        plan_tier: "pro".to_string(),
    }
}

#[derive(Default)]
pub struct FakeConnect {
    pub reject_quota: Mutex<Option<QuotaInfo>>,
    pub requests: Mutex<Vec<ConnectRequest>>,
}

#[async_trait]
impl ConnectEndpoint for FakeConnect {
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse> {
        self.requests.lock().push(request);
        if let Some(quota) = self.reject_quota.lock().clone() {
            return Err(VoiceError::QuotaExceeded(quota));
        }
        Ok(ConnectResponse {
            credential: SecretString::from("ephemeral-token"),
            model_id: "realtime-1".to_string(),
            transport_config: TransportConfig::default(),
            usage_tracking_id: Some("usage-1".to_string()),
            quota: Some(sample_quota(42)),
        })
    }
}

#[derive(Default)]
pub struct FakeUsage {
    pub reported: Mutex<Vec<String>>,
}

#[async_trait]
impl UsageReporter for FakeUsage {
    async fn report_session_end(&self, usage_tracking_id: &str) -> Result<()> {
        self.reported.lock().push(usage_tracking_id.to_string());
        Ok(())
    }
}

// ── Tool plane ──────────────────────────────────────────────────────────

/// Echoes each call back as a success, unless told to fail the batch or to
/// drop outcomes from the end of the batch.
#[derive(Default)]
pub struct FakeExecutor {
    pub fail_batch: AtomicBool,
    pub drop_last: AtomicBool,
    pub seen_context: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ToolExecutor for FakeExecutor {
    async fn execute_batch(
        &self,
        calls: &[PendingToolCall],
        _identity: &SessionIdentity,
        latest_user_message: Option<&str>,
    ) -> Result<Vec<ToolOutcome>> {
        self.seen_context.lock().push(latest_user_message.map(str::to_string));
        if self.fail_batch.load(Ordering::SeqCst) {
            return Err(VoiceError::tool("executor unreachable"));
        }
        let mut outcomes: Vec<ToolOutcome> = calls
            .iter()
            .map(|call| ToolOutcome::ok(&call.id, &call.name, json!({ "echo": call.args })))
            .collect();
        if self.drop_last.load(Ordering::SeqCst) {
            outcomes.pop();
        }
        Ok(outcomes)
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub appended: Mutex<Vec<ToolOutcome>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ConversationStore for FakeStore {
    async fn append_tool_result(
        &self,
        _identity: &SessionIdentity,
        outcome: &ToolOutcome,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::persistence("conversation write failed"));
        }
        self.appended.lock().push(outcome.clone());
        Ok(())
    }
}

// ── Output clock ────────────────────────────────────────────────────────

pub struct FakeClock {
    pub rate: u32,
    pub now: Mutex<f64>,
    pub scheduled: Mutex<Vec<(AudioFrame, f64)>>,
    pub stops: AtomicUsize,
}

impl FakeClock {
    pub fn new(rate: u32) -> Arc<Self> {
        Arc::new(Self {
            rate,
            now: Mutex::new(0.0),
            scheduled: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        })
    }
}

/// Local handle implementing the clock trait over a shared [`FakeClock`],
/// so the test keeps inspecting the clock after handing it to the engine.
pub struct ClockHandle(pub Arc<FakeClock>);

impl OutputClock for ClockHandle {
    fn now(&self) -> f64 {
        *self.0.now.lock()
    }

    fn sample_rate(&self) -> u32 {
        self.0.rate
    }

    fn schedule(&self, frame: AudioFrame, at: f64) {
        self.0.scheduled.lock().push((frame, at));
    }

    fn stop_all(&self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn tracked_clock_factory() -> (ClockFactory, Arc<Mutex<Vec<Arc<FakeClock>>>>) {
    let created: Arc<Mutex<Vec<Arc<FakeClock>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&created);
    let factory: ClockFactory = Arc::new(move |rate| {
        let clock = FakeClock::new(rate);
        log.lock().push(Arc::clone(&clock));
        Box::new(ClockHandle(clock)) as Box<dyn OutputClock>
    });
    (factory, created)
}

// ── Harness ─────────────────────────────────────────────────────────────

pub struct Harness {
    pub session: Arc<VoiceSession>,
    pub transport: Arc<FakeTransport>,
    pub inbound: mpsc::UnboundedSender<Result<InboundEvent>>,
    pub device: Arc<FakeDevice>,
    pub connect: Arc<FakeConnect>,
    pub usage: Arc<FakeUsage>,
    pub executor: Arc<FakeExecutor>,
    pub store: Arc<FakeStore>,
    pub clocks: Arc<Mutex<Vec<Arc<FakeClock>>>>,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let (transport, inbound) = FakeTransport::new();
        let device = Arc::new(FakeDevice::default());
        let connect = Arc::new(FakeConnect::default());
        let usage = Arc::new(FakeUsage::default());
        let executor = Arc::new(FakeExecutor::default());
        let store = Arc::new(FakeStore::default());
        let (factory, clocks) = tracked_clock_factory();

        let session = VoiceSession::builder()
            .config(config)
            .readiness(Arc::new(FakeReadiness))
            .connect_endpoint(Arc::clone(&connect) as Arc<dyn ConnectEndpoint>)
            .transport_connector(Arc::new(FakeConnector(Arc::clone(&transport))))
            .capture_device(Arc::clone(&device) as Arc<dyn CaptureDevice>)
            .tool_executor(Arc::clone(&executor) as Arc<dyn ToolExecutor>)
            .conversation_store(Arc::clone(&store) as Arc<dyn ConversationStore>)
            .usage_reporter(Arc::clone(&usage) as Arc<dyn UsageReporter>)
            .clock_factory(factory)
            .build()
            .unwrap();
        let events = session.take_events().unwrap();

        Self { session, transport, inbound, device, connect, usage, executor, store, clocks, events }
    }

    /// Push an inbound event and let the dispatch loop run.
    pub async fn deliver(&self, event: InboundEvent) {
        self.inbound.send(Ok(event)).unwrap();
        settle().await;
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Let spawned tasks make progress (works under a paused clock too).
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// One frame's worth of loud input at the capture rate.
pub fn loud_block(frames: usize) -> Vec<f32> {
    (0..frames * voice_session::FRAME_SAMPLES)
        .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
        .collect()
}

/// PCM16 little-endian bytes for `n` samples, plus the matching mime tag.
pub fn pcm_chunk(n: usize, rate: u32) -> (Bytes, String) {
    let frame = AudioFrame { samples: vec![1000i16; n], sample_rate: rate };
    (Bytes::from(frame.to_le_bytes()), format!("audio/pcm;rate={rate}"))
}
