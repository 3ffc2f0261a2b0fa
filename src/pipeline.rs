//! Acquisition loop.
//!
//! Drives the cycle: capture → ensure_size → convert → stamp → publish.
//! One frame at a time, no queue; pacing comes entirely from the capture
//! source's bounded blocking wait. Transient failures (capture timeout or
//! fault, resize failure, conversion failure, publish failure) abandon the
//! current cycle without consuming a sequence number; the loop continues.
//!
//! There is deliberately no backoff or escalation: an indefinitely failing
//! device spins forever without publishing, dropping frames rather than
//! stalling. Shutdown is cooperative, observed at the top of each cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::FrameSource;
use crate::convert::FrameConverter;
use crate::envelope::FrameEnvelope;
use crate::error::CaptureError;
use crate::publish::FramePublisher;

/// Default bounded wait for one capture call.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(1);

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Per-process counters, exposed for the health log and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u64,
    pub capture_failures: u64,
    pub convert_failures: u64,
    pub publish_failures: u64,
}

/// The full pipeline state, owned by the process entry point.
///
/// No globals: source, converter, publisher, sequence counter, and the
/// once-computed source id all live here.
pub struct AcquisitionPipeline<S, P> {
    source: S,
    converter: FrameConverter,
    publisher: P,
    /// Derived once from the opened source, reused for every envelope.
    source_id: String,
    seq: u64,
    capture_timeout: Duration,
    stats: PipelineStats,
    shutdown: Arc<AtomicBool>,
}

impl<S: FrameSource, P: FramePublisher> AcquisitionPipeline<S, P> {
    pub fn new(source: S, publisher: P, shutdown: Arc<AtomicBool>) -> Self {
        let source_id = source.resource_id().to_string();
        Self {
            source,
            converter: FrameConverter::new(),
            publisher,
            source_id,
            seq: 0,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            stats: PipelineStats::default(),
            shutdown,
        }
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Access the transport, mainly useful for sinks that record frames.
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Tear down, handing the transport back for an orderly disconnect.
    pub fn into_publisher(self) -> P {
        self.publisher
    }

    /// Run cycles until the shutdown flag is set.
    ///
    /// The flag is checked at the top of each cycle; a cycle in flight is
    /// allowed to finish (publish is the last step, so there is no partial
    /// state to unwind).
    pub fn run(&mut self) {
        let mut last_health_log = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            self.run_cycle();

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "camera health: published={} capture_failures={} convert_failures={} \
                     publish_failures={}",
                    self.stats.published,
                    self.stats.capture_failures,
                    self.stats.convert_failures,
                    self.stats.publish_failures,
                );
                last_health_log = Instant::now();
            }
        }

        log::info!(
            "acquisition loop stopped after {} published frames",
            self.stats.published
        );
    }

    /// Execute one cycle. Returns true when a frame was published.
    pub fn run_cycle(&mut self) -> bool {
        let raw = match self.source.capture(self.capture_timeout) {
            Ok(raw) => raw,
            Err(err @ CaptureError::Timeout { .. }) => {
                log::debug!("capture timed out: {}", err);
                self.stats.capture_failures += 1;
                return false;
            }
            Err(err) => {
                log::error!("failed to capture camera frame: {}", err);
                self.stats.capture_failures += 1;
                return false;
            }
        };

        if let Err(err) = self.converter.ensure_size(raw.width, raw.height, raw.format) {
            log::error!("failed to resize frame converter: {}", err);
            self.stats.convert_failures += 1;
            return false;
        }

        let view = match self.converter.convert(&raw) {
            Ok(view) => view,
            Err(err) => {
                log::error!("failed to convert camera frame: {}", err);
                self.stats.convert_failures += 1;
                return false;
            }
        };

        let envelope = FrameEnvelope::stamp_now(self.seq, &self.source_id);
        match self.publisher.publish(&view, &envelope) {
            Ok(()) => {
                self.seq = self.seq.wrapping_add(1);
                self.stats.published += 1;
                log::debug!("published camera frame seq={}", envelope.seq);
                true
            }
            Err(err) => {
                log::error!("failed to publish camera frame: {:#}", err);
                self.stats.publish_failures += 1;
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, RawFrame};
    use crate::convert::ConvertedFrameView;
    use crate::publish::MemoryPublisher;
    use std::collections::VecDeque;

    enum Step {
        Frame(u32, u32),
        Timeout,
        Fault,
    }

    /// Scripted source: plays back a fixed capture schedule.
    struct ScriptedSource {
        steps: VecDeque<Step>,
        width: u32,
        height: u32,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                width: 640,
                height: 480,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
            match self.steps.pop_front() {
                Some(Step::Frame(width, height)) => {
                    self.width = width;
                    self.height = height;
                    let data = vec![1u8; (width * height * 3) as usize];
                    Ok(RawFrame::new(data, width, height, PixelFormat::Rgb24))
                }
                Some(Step::Timeout) | None => Err(CaptureError::Timeout { timeout }),
                Some(Step::Fault) => Err(CaptureError::Device("injected fault".to_string())),
            }
        }

        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn resource_id(&self) -> &str {
            "csi://0"
        }
    }

    fn pipeline_for(
        steps: Vec<Step>,
    ) -> AcquisitionPipeline<ScriptedSource, MemoryPublisher> {
        AcquisitionPipeline::new(
            ScriptedSource::new(steps),
            MemoryPublisher::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .with_capture_timeout(Duration::from_millis(1))
    }

    fn run_cycles<S: FrameSource, P: FramePublisher>(
        pipeline: &mut AcquisitionPipeline<S, P>,
        cycles: usize,
    ) {
        for _ in 0..cycles {
            pipeline.run_cycle();
        }
    }

    #[test]
    fn sequence_is_strictly_increasing_from_zero() {
        let mut pipeline = pipeline_for(vec![
            Step::Frame(640, 480),
            Step::Frame(640, 480),
            Step::Frame(640, 480),
        ]);
        run_cycles(&mut pipeline, 3);

        let seqs: Vec<u64> = pipeline
            .publisher
            .frames
            .iter()
            .map(|f| f.envelope.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn failures_do_not_consume_sequence_numbers() {
        let mut pipeline = pipeline_for(vec![
            Step::Frame(640, 480),
            Step::Timeout,
            Step::Fault,
            Step::Timeout,
            Step::Frame(640, 480),
        ]);
        run_cycles(&mut pipeline, 5);

        let seqs: Vec<u64> = pipeline
            .publisher
            .frames
            .iter()
            .map(|f| f.envelope.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1]);

        let stats = pipeline.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.capture_failures, 3);
        assert_eq!(stats.convert_failures, 0);
    }

    #[test]
    fn source_id_is_stable_across_cycles() {
        let mut pipeline = pipeline_for(vec![
            Step::Frame(640, 480),
            Step::Frame(640, 480),
            Step::Frame(640, 480),
        ]);
        run_cycles(&mut pipeline, 3);

        for frame in &pipeline.publisher.frames {
            assert_eq!(frame.envelope.source_id, "csi://0");
        }
    }

    #[test]
    fn geometry_change_mid_run_is_transparent() {
        let mut pipeline = pipeline_for(vec![
            Step::Frame(640, 480),
            Step::Frame(1280, 720),
            Step::Frame(640, 480),
        ]);
        run_cycles(&mut pipeline, 3);

        let dims: Vec<(u32, u32)> = pipeline
            .publisher
            .frames
            .iter()
            .map(|f| (f.width, f.height))
            .collect();
        assert_eq!(dims, vec![(640, 480), (1280, 720), (640, 480)]);
        assert_eq!(pipeline.stats().published, 3);

        // Every published buffer is full RGBA for its geometry.
        for frame in &pipeline.publisher.frames {
            assert_eq!(
                frame.pixels.len(),
                (frame.width * frame.height * 4) as usize
            );
        }
    }

    #[test]
    fn scenario_three_frames_timeout_then_success() {
        // Open csi://0 @ 640x480: 3 successes, 1 timeout, 1 success.
        let mut pipeline = pipeline_for(vec![
            Step::Frame(640, 480),
            Step::Frame(640, 480),
            Step::Frame(640, 480),
            Step::Timeout,
            Step::Frame(640, 480),
        ]);
        run_cycles(&mut pipeline, 5);

        let frames = &pipeline.publisher.frames;
        assert_eq!(frames.len(), 4, "timeout cycle must not publish");
        let seqs: Vec<u64> = frames.iter().map(|f| f.envelope.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert!(frames
            .iter()
            .all(|f| f.envelope.source_id == frames[0].envelope.source_id));
    }

    #[test]
    fn publish_failure_does_not_consume_sequence() {
        struct FailOnce {
            failed: bool,
            inner: MemoryPublisher,
        }
        impl FramePublisher for FailOnce {
            fn publish(
                &mut self,
                frame: &ConvertedFrameView<'_>,
                envelope: &FrameEnvelope,
            ) -> anyhow::Result<()> {
                if !self.failed {
                    self.failed = true;
                    anyhow::bail!("transport hiccup");
                }
                self.inner.publish(frame, envelope)
            }
        }

        let mut pipeline = AcquisitionPipeline::new(
            ScriptedSource::new(vec![Step::Frame(640, 480), Step::Frame(640, 480)]),
            FailOnce {
                failed: false,
                inner: MemoryPublisher::new(),
            },
            Arc::new(AtomicBool::new(false)),
        );
        run_cycles(&mut pipeline, 2);

        assert_eq!(pipeline.publisher.inner.frames.len(), 1);
        assert_eq!(pipeline.publisher.inner.frames[0].envelope.seq, 0);
        assert_eq!(pipeline.stats().publish_failures, 1);
    }

    #[test]
    fn run_stops_when_shutdown_flag_is_set() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut pipeline = AcquisitionPipeline::new(
            ScriptedSource::new(vec![Step::Frame(640, 480)]),
            MemoryPublisher::new(),
            shutdown,
        );

        // Flag already set: run() must return without executing a cycle.
        pipeline.run();
        assert_eq!(pipeline.stats().published, 0);
        assert!(pipeline.publisher.frames.is_empty());
    }
}
