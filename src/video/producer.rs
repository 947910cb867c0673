//! Track producer
//!
//! A producer binds one frame source to one pacing clock and pushes
//! timestamped samples into the session's outbound sink. Robots run one
//! producer per emitted stream; each producer owns its source exclusively
//! and releases it when the loop ends.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::video::clock::{FrameClock, PacedTimestamp};
use crate::video::frame::RgbFrame;
use crate::video::source::FrameSource;

/// Frames between periodic progress logs
const FRAME_LOG_INTERVAL: u64 = 30;

/// One timestamped frame on its way to the session
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub image: RgbFrame,
    pub pts: PacedTimestamp,
}

/// Outbound delivery seam for paced samples.
///
/// Delivery failures are the sink's problem to report; the producer logs
/// them at debug and keeps going, since transport failure reaches the
/// session through the negotiator's own channel.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn deliver(&self, sample: MediaSample) -> Result<()>;
}

/// Paces one stream: clock tick, capture, tag, deliver
pub struct TrackProducer {
    label: String,
    source: Box<dyn FrameSource>,
    clock: FrameClock,
    sink: Arc<dyn MediaSink>,
    sequence: u64,
    stopped: bool,
}

impl TrackProducer {
    pub fn new(source: Box<dyn FrameSource>, target_fps: u32, sink: Arc<dyn MediaSink>) -> Self {
        let label = source.label().to_string();
        Self {
            label,
            source,
            clock: FrameClock::new(target_fps),
            sink,
            sequence: 0,
            stopped: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    /// Run one pacing cycle: wait for the tick, capture, deliver.
    ///
    /// A capture failure stops this producer (source released) before the
    /// error propagates. Ticks after stop fail with `StreamNotLive`.
    pub async fn tick(&mut self) -> Result<()> {
        if self.stopped {
            return Err(AppError::StreamNotLive(self.label.clone()));
        }

        let pts = self.clock.next_tick(self.sequence).await;

        let image = match self.source.capture_one().await {
            Ok(frame) => frame,
            Err(e) => {
                self.stop().await;
                return Err(e);
            }
        };

        self.sequence += 1;
        if self.sequence % FRAME_LOG_INTERVAL == 0 {
            debug!("[{}] {} frames emitted", self.label, self.sequence);
        }

        if let Err(e) = self.sink.deliver(MediaSample { image, pts }).await {
            debug!("[{}] sink delivery failed: {}", self.label, e);
        }

        Ok(())
    }

    /// Stop the producer and release its source, idempotent
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.source.close().await;
    }

    /// Drive ticks until cancellation or failure.
    ///
    /// Returns the stream label and either the emitted frame count or the
    /// error that ended the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> (String, Result<u64>) {
        let label = self.label.clone();
        info!("[{}] producer started", label);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop().await;
                    info!("[{}] producer stopped after {} frames", label, self.sequence);
                    return (label, Ok(self.sequence));
                }
                result = self.tick() => {
                    if let Err(e) = result {
                        error!(
                            "[{}] producer failed after {} frames: {}",
                            label, self.sequence, e
                        );
                        return (label, Err(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::Resolution;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TEST_RES: Resolution = Resolution {
        width: 4,
        height: 4,
    };

    fn test_frame(sequence: u64) -> RgbFrame {
        RgbFrame::from_vec(vec![0u8; 4 * 4 * 3], TEST_RES, sequence)
    }

    struct ScriptedSource {
        label: String,
        frames: Mutex<VecDeque<Result<RgbFrame>>>,
        closed: AtomicBool,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<RgbFrame>>) -> Self {
            Self {
                label: "scripted".to_string(),
                frames: Mutex::new(frames.into()),
                closed: AtomicBool::new(false),
            }
        }

        fn ok_frames(count: u64) -> Self {
            Self::new((0..count).map(|i| Ok(test_frame(i))).collect())
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn capture_one(&self) -> Result<RgbFrame> {
            self.frames.lock().pop_front().unwrap_or_else(|| {
                Err(AppError::ReadFailure {
                    device: "scripted".to_string(),
                    reason: "script exhausted".to_string(),
                })
            })
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn label(&self) -> &str {
            &self.label
        }
    }

    #[derive(Default)]
    struct CollectSink {
        samples: Mutex<Vec<MediaSample>>,
    }

    #[async_trait]
    impl MediaSink for CollectSink {
        async fn deliver(&self, sample: MediaSample) -> Result<()> {
            self.samples.lock().push(sample);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl MediaSink for FailingSink {
        async fn deliver(&self, _sample: MediaSample) -> Result<()> {
            Err(AppError::Transport("sink down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_and_timestamps_advance() {
        let sink = Arc::new(CollectSink::default());
        let source = Box::new(ScriptedSource::ok_frames(3));
        let mut producer = TrackProducer::new(source, 30, sink.clone());

        for _ in 0..3 {
            producer.tick().await.unwrap();
        }

        let samples = sink.samples.lock();
        let sequences: Vec<u64> = samples.iter().map(|s| s.pts.sequence).collect();
        let ticks: Vec<u64> = samples.iter().map(|s| s.pts.ticks).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(ticks, vec![0, 3000, 6000]);
        assert_eq!(producer.frames_emitted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_on_fifth_tick_stops_after_four_frames() {
        let sink = Arc::new(CollectSink::default());
        let source = Box::new(ScriptedSource::ok_frames(4));
        let mut producer = TrackProducer::new(source, 30, sink.clone());

        for _ in 0..4 {
            producer.tick().await.unwrap();
        }
        let err = producer.tick().await.unwrap_err();
        assert!(matches!(err, AppError::ReadFailure { .. }));
        assert_eq!(producer.frames_emitted(), 4);
        assert_eq!(sink.samples.lock().len(), 4);

        // Producer is closed now, further ticks are rejected
        let err = producer.tick().await.unwrap_err();
        assert!(matches!(err, AppError::StreamNotLive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_after_stop_rejected_and_source_released() {
        let source = ScriptedSource::ok_frames(10);
        let closed = Arc::new(source);
        // Keep a handle on the closed flag through the Arc
        struct Wrap(Arc<ScriptedSource>);
        #[async_trait]
        impl FrameSource for Wrap {
            async fn capture_one(&self) -> Result<RgbFrame> {
                self.0.capture_one().await
            }
            async fn close(&self) {
                self.0.close().await
            }
            fn label(&self) -> &str {
                self.0.label()
            }
        }

        let sink = Arc::new(CollectSink::default());
        let mut producer = TrackProducer::new(Box::new(Wrap(closed.clone())), 30, sink);

        producer.tick().await.unwrap();
        producer.stop().await;
        producer.stop().await;
        assert!(closed.closed.load(Ordering::SeqCst));

        let err = producer.tick().await.unwrap_err();
        assert!(matches!(err, AppError::StreamNotLive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_stop_producer() {
        let source = Box::new(ScriptedSource::ok_frames(2));
        let mut producer = TrackProducer::new(source, 30, Arc::new(FailingSink));

        producer.tick().await.unwrap();
        producer.tick().await.unwrap();
        assert_eq!(producer.frames_emitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_frames_on_cancellation() {
        let sink = Arc::new(CollectSink::default());
        let source = Box::new(ScriptedSource::ok_frames(1000));
        let producer = TrackProducer::new(source, 30, sink);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(producer.run(cancel.clone()));
        // Let a few paced frames through, then stop.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();

        let (label, result) = handle.await.unwrap();
        assert_eq!(label, "scripted");
        let frames = result.unwrap();
        assert!(frames > 0, "expected some frames, got {}", frames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_surfaces_capture_failure() {
        let sink = Arc::new(CollectSink::default());
        let source = Box::new(ScriptedSource::ok_frames(2));
        let producer = TrackProducer::new(source, 30, sink);

        let (label, result) = producer.run(CancellationToken::new()).await;
        assert_eq!(label, "scripted");
        assert!(result.is_err());
    }
}
