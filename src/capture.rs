//! Capture pipeline: microphone blocks in, ordered outbound frames out.
//!
//! The device thread calls [`CapturePipeline::push_block`] at its native
//! block size and rate; the pipeline resamples to the fixed input rate,
//! chunks into 100 ms frames, publishes the input level, applies
//! push-to-talk gating, and forwards kept frames to the outbound channel in
//! capture order.

use crate::audio::{self, AudioFormat, AudioFrame, FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::config::SessionMode;
use crate::error::Result;
use crate::events::OutboundMessage;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};

/// Callback the capture device invokes with each raw block.
///
/// Arguments are the raw float samples and the device's native sample rate.
pub type CaptureSink = Arc<dyn Fn(&[f32], u32) + Send + Sync>;

/// An exclusive input device stream.
///
/// Real devices sit behind this trait so the pipeline never touches
/// platform audio APIs directly; tests drive it with scripted fakes.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire the input stream and start delivering blocks to `sink`.
    ///
    /// Fails with [`crate::VoiceError::DeviceUnavailable`] when permission
    /// is denied or no device exists.
    async fn start(&self, sink: CaptureSink) -> Result<()>;

    /// Release the input stream. Safe to call when not started.
    async fn stop(&self);
}

/// Turns raw device blocks into a sequence of outbound frames.
pub struct CapturePipeline {
    mode: SessionMode,
    queue: Mutex<VecDeque<i16>>,
    talking: AtomicBool,
    level_tx: Arc<watch::Sender<f32>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl CapturePipeline {
    /// Create a pipeline that forwards kept frames to `outbound` and
    /// publishes the input level through `level_tx`.
    pub fn new(
        mode: SessionMode,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        level_tx: Arc<watch::Sender<f32>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            mode,
            queue: Mutex::new(VecDeque::new()),
            talking: AtomicBool::new(false),
            level_tx,
            outbound,
        })
    }

    /// Set the explicit push-to-talk activity flag. No effect in
    /// continuous mode.
    pub fn set_talking(&self, talking: bool) {
        self.talking.store(talking, Ordering::SeqCst);
    }

    /// Whether the push-to-talk flag is currently set.
    pub fn is_talking(&self) -> bool {
        self.talking.load(Ordering::SeqCst)
    }

    /// The sink to hand to a [`CaptureDevice`].
    pub fn sink(self: &Arc<Self>) -> CaptureSink {
        let pipeline = Arc::clone(self);
        Arc::new(move |samples, rate| pipeline.push_block(samples, rate))
    }

    /// Ingest one raw block from the device thread.
    pub fn push_block(&self, samples: &[f32], source_rate: u32) {
        let resampled = audio::resample_to_input_rate(samples, source_rate);

        let mut queue = self.queue.lock();
        queue.extend(resampled.samples);

        while queue.len() >= FRAME_SAMPLES {
            let chunk: Vec<i16> = queue.drain(..FRAME_SAMPLES).collect();
            let frame = AudioFrame::new(chunk, INPUT_SAMPLE_RATE);

            // Level is published regardless of mode and gating, for UI meters.
            // send_replace holds the value even when no meter is subscribed yet.
            self.level_tx.send_replace(frame.rms());

            let keep = match self.mode {
                SessionMode::Continuous => true,
                SessionMode::PushToTalk => {
                    self.talking.load(Ordering::SeqCst) && !frame.is_silent()
                }
            };
            if !keep {
                continue;
            }

            let message = OutboundMessage::RealtimeAudio {
                data: Bytes::from(frame.to_le_bytes()),
                mime_type: AudioFormat::pcm16_16khz().mime_type(),
            };
            if self.outbound.send(message).is_err() {
                tracing::debug!("outbound channel closed, dropping capture frame");
                return;
            }
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("mode", &self.mode)
            .field("talking", &self.talking.load(Ordering::SeqCst))
            .field("queued_samples", &self.queue.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pipeline(
        mode: SessionMode,
    ) -> (Arc<CapturePipeline>, mpsc::UnboundedReceiver<OutboundMessage>, watch::Receiver<f32>)
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let pipeline = CapturePipeline::new(mode, out_tx, Arc::new(level_tx));
        (pipeline, out_rx, level_rx)
    }

    fn loud_block() -> Vec<f32> {
        vec![0.5; FRAME_SAMPLES]
    }

    fn silent_block() -> Vec<f32> {
        vec![0.0; FRAME_SAMPLES]
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn push_to_talk_drops_silent_frames() {
        let (pipeline, mut rx, _level) = pipeline(SessionMode::PushToTalk);
        pipeline.set_talking(true);

        // 12 chunks: 8 above the silence threshold, 4 below.
        for i in 0..12 {
            if i % 3 == 2 {
                pipeline.push_block(&silent_block(), INPUT_SAMPLE_RATE);
            } else {
                pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
            }
        }

        assert_eq!(drain(&mut rx).len(), 8);
    }

    #[test]
    fn push_to_talk_drops_everything_until_talking() {
        let (pipeline, mut rx, _level) = pipeline(SessionMode::PushToTalk);

        pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
        assert!(drain(&mut rx).is_empty());

        pipeline.set_talking(true);
        pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
        assert_eq!(drain(&mut rx).len(), 1);

        pipeline.set_talking(false);
        pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn continuous_mode_forwards_silent_frames() {
        let (pipeline, mut rx, _level) = pipeline(SessionMode::Continuous);

        pipeline.push_block(&silent_block(), INPUT_SAMPLE_RATE);
        pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
        pipeline.push_block(&silent_block(), INPUT_SAMPLE_RATE);

        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn level_published_even_when_gated() {
        let (pipeline, mut rx, level) = pipeline(SessionMode::PushToTalk);

        // Not talking: frame dropped, but the meter still moves.
        pipeline.push_block(&loud_block(), INPUT_SAMPLE_RATE);
        assert!(drain(&mut rx).is_empty());
        assert!(*level.borrow() > 0.4);
    }

    #[test]
    fn partial_blocks_accumulate_until_a_full_frame() {
        let (pipeline, mut rx, _level) = pipeline(SessionMode::Continuous);

        pipeline.push_block(&vec![0.5; FRAME_SAMPLES / 2], INPUT_SAMPLE_RATE);
        assert!(drain(&mut rx).is_empty());

        pipeline.push_block(&vec![0.5; FRAME_SAMPLES / 2], INPUT_SAMPLE_RATE);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn forwarded_frames_are_tagged_with_input_rate() {
        let (pipeline, mut rx, _level) = pipeline(SessionMode::Continuous);
        // 48 kHz device block resamples down to one full frame.
        pipeline.push_block(&vec![0.5; FRAME_SAMPLES * 3], 48_000);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            OutboundMessage::RealtimeAudio { data, mime_type } => {
                assert_eq!(mime_type, "audio/pcm;rate=16000");
                assert_eq!(data.len(), FRAME_SAMPLES * 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    proptest! {
        // Frames come out in capture order: encode the block index into the
        // amplitude and check the forwarded sequence is monotonically
        // increasing.
        #[test]
        fn frames_preserve_arrival_order(block_count in 1usize..20) {
            let (pipeline, mut rx, _level) = pipeline(SessionMode::Continuous);
            for i in 0..block_count {
                let amplitude = 0.1 + 0.8 * (i as f32 / 20.0);
                pipeline.push_block(&vec![amplitude; FRAME_SAMPLES], INPUT_SAMPLE_RATE);
            }

            let messages = drain(&mut rx);
            prop_assert_eq!(messages.len(), block_count);
            let mut last = 0i16;
            for message in messages {
                let OutboundMessage::RealtimeAudio { data, .. } = message else {
                    return Err(TestCaseError::fail("unexpected message type"));
                };
                let frame = AudioFrame::from_le_bytes(&data, INPUT_SAMPLE_RATE).unwrap();
                prop_assert!(frame.samples[0] > last);
                last = frame.samples[0];
            }
        }
    }
}
