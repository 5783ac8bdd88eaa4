use super::detector::Detector;
use super::overlay::draw_boxes;
use crate::alerts::{AlertDispatcher, AlertEvent};
use crate::error::FrameError;
use crate::events::{EventBus, WorkerEvent};
use crate::frame::{BoundingBox, FrameReader, FrameWriter, RawFrame};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Why the sampling loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerEnd {
    /// Decode stream closed on a frame boundary
    StreamEnded,
    /// Decode stream closed part-way through a frame
    FramingViolation { expected: usize, actual: usize },
    ReadFailed(String),
    /// Annotated output could not be forwarded
    EncoderFailed(String),
    /// The blocking detection task panicked or was cancelled
    DetectorFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerReport {
    pub frames: u64,
    pub alerts: u64,
    pub end: SamplerEnd,
}

/// Reads raw frames from analysis-decode, runs detection, raises alerts and
/// optionally forwards annotated frames to analysis-encode
pub struct FrameSampler<R, W> {
    camera_id: String,
    reader: FrameReader<R>,
    writer: Option<FrameWriter<W>>,
    detector: Option<Box<dyn Detector>>,
    dispatcher: Arc<AlertDispatcher>,
    events: EventBus,
}

impl<R, W> FrameSampler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        camera_id: impl Into<String>,
        reader: FrameReader<R>,
        writer: Option<FrameWriter<W>>,
        detector: Box<dyn Detector>,
        dispatcher: Arc<AlertDispatcher>,
        events: EventBus,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            reader,
            writer,
            detector: Some(detector),
            dispatcher,
            events,
        }
    }

    /// Run until the decode stream ends or the encoder goes away
    pub async fn run(mut self) -> SamplerReport {
        let mut alerts = 0u64;

        let end = loop {
            let frame = match self.reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break SamplerEnd::StreamEnded,
                Err(FrameError::ShortRead { expected, actual }) => {
                    break SamplerEnd::FramingViolation { expected, actual }
                }
                Err(e) => break SamplerEnd::ReadFailed(e.to_string()),
            };

            let (frame, boxes) = match self.detect(frame).await {
                Ok(detected) => detected,
                Err(e) => break SamplerEnd::DetectorFailed(e),
            };

            let frame = Arc::new(frame);
            if !boxes.is_empty() {
                alerts += 1;
                self.raise_alert(&frame, boxes.clone());
            }

            if let Err(e) = self.forward(&frame, &boxes).await {
                break SamplerEnd::EncoderFailed(e.to_string());
            }
        };

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.shutdown().await {
                debug!(camera_id = %self.camera_id, "Closing encoder input: {}", e);
            }
        }

        let report = SamplerReport {
            frames: self.reader.frames_read(),
            alerts,
            end,
        };

        match &report.end {
            SamplerEnd::StreamEnded => info!(
                camera_id = %self.camera_id,
                "Frame stream ended after {} frame(s), {} alert(s)",
                report.frames,
                report.alerts
            ),
            other => warn!(
                camera_id = %self.camera_id,
                "Frame sampling stopped after {} frame(s): {:?}",
                report.frames,
                other
            ),
        }

        report
    }

    /// Detect on the blocking pool. The detector travels with the frame and
    /// both are handed back.
    async fn detect(&mut self, frame: RawFrame) -> Result<(RawFrame, Vec<BoundingBox>), String> {
        let mut detector = self
            .detector
            .take()
            .ok_or_else(|| "detector lost by an earlier failed task".to_string())?;

        let (detector, frame, result) = tokio::task::spawn_blocking(move || {
            let result = detector.detect(&frame);
            (detector, frame, result)
        })
        .await
        .map_err(|e| e.to_string())?;
        self.detector = Some(detector);

        let boxes = match result {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(camera_id = %self.camera_id, "Frame {}: {}", frame.sequence, e);
                Vec::new()
            }
        };
        Ok((frame, boxes))
    }

    fn raise_alert(&self, frame: &Arc<RawFrame>, boxes: Vec<BoundingBox>) {
        self.events.publish(WorkerEvent::AlertRaised {
            camera_id: self.camera_id.clone(),
            frame_sequence: frame.sequence,
            boxes: boxes.clone(),
            timestamp: frame.timestamp,
        });

        let event = AlertEvent::new(self.camera_id.clone(), boxes).with_frame(frame.clone());
        self.dispatcher.dispatch(event);
    }

    async fn forward(
        &mut self,
        frame: &Arc<RawFrame>,
        boxes: &[BoundingBox],
    ) -> Result<(), FrameError> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Ok(()),
        };

        if boxes.is_empty() {
            writer.write_frame(frame).await
        } else {
            let mut annotated = (**frame).clone();
            draw_boxes(&mut annotated, boxes);
            writer.write_frame(&annotated).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectorError;
    use crate::frame::FrameGeometry;
    use crate::testing::{RecordingSink, ScriptedDetector};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(8, 6, 3)
    }

    fn sampler(
        input: Vec<u8>,
        script: HashMap<u64, Vec<BoundingBox>>,
        writer: Option<DuplexStream>,
        sink: Arc<RecordingSink>,
        events: EventBus,
    ) -> (FrameSampler<std::io::Cursor<Vec<u8>>, DuplexStream>, Arc<AlertDispatcher>) {
        let dispatcher = Arc::new(AlertDispatcher::new("cam1", sink, None, None));
        let sampler = FrameSampler::new(
            "cam1",
            FrameReader::new(std::io::Cursor::new(input), geometry()),
            writer.map(|w| FrameWriter::new(w, geometry())),
            Box::new(ScriptedDetector::new(script)),
            dispatcher.clone(),
            events,
        );
        (sampler, dispatcher)
    }

    #[tokio::test]
    async fn test_one_alert_per_frame_with_boxes() {
        let sink = Arc::new(RecordingSink::default());
        let events = EventBus::new(16);
        let mut alerts = events.subscribe();

        let boxes = vec![BoundingBox::new(1, 1, 2, 2), BoundingBox::new(4, 3, 2, 2)];
        let script = HashMap::from([(1, boxes.clone()), (3, vec![BoundingBox::new(0, 0, 1, 1)])]);
        let input = vec![0u8; geometry().frame_size() * 4];

        let (sampler, dispatcher) = sampler(input, script, None, sink.clone(), events);
        let report = sampler.run().await;
        dispatcher.drain(Duration::from_secs(5)).await;

        assert_eq!(report.frames, 4);
        assert_eq!(report.alerts, 2);
        assert_eq!(report.end, SamplerEnd::StreamEnded);

        let posted = sink.payloads();
        assert_eq!(posted.len(), 2);
        let first = posted.iter().find(|p| p.bounding_boxes.len() == 2).unwrap();
        assert_eq!(first.bounding_boxes, boxes);

        match alerts.recv().await.unwrap() {
            WorkerEvent::AlertRaised { frame_sequence, .. } => assert_eq!(frame_sequence, 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_boxes_no_alert() {
        let sink = Arc::new(RecordingSink::default());
        let input = vec![0u8; geometry().frame_size() * 3];
        let (sampler, dispatcher) =
            sampler(input, HashMap::new(), None, sink.clone(), EventBus::new(4));

        let report = sampler.run().await;
        dispatcher.drain(Duration::from_secs(5)).await;
        assert_eq!(report.alerts, 0);
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_short_read_ends_sampling() {
        let sink = Arc::new(RecordingSink::default());
        let input = vec![0u8; geometry().frame_size() * 2 + 10];
        let (sampler, _) = sampler(input, HashMap::new(), None, sink, EventBus::new(4));

        let report = sampler.run().await;
        assert_eq!(report.frames, 2);
        assert_eq!(
            report.end,
            SamplerEnd::FramingViolation {
                expected: geometry().frame_size(),
                actual: 10
            }
        );
    }

    #[tokio::test]
    async fn test_forwards_annotated_frames() {
        let sink = Arc::new(RecordingSink::default());
        let (encoder_in, mut encoder_out) = tokio::io::duplex(4096);
        let script = HashMap::from([(1, vec![BoundingBox::new(0, 0, 4, 4)])]);
        let input = vec![0u8; geometry().frame_size() * 2];

        let (sampler, _) = sampler(input, script, Some(encoder_in), sink, EventBus::new(4));
        let report = sampler.run().await;
        assert_eq!(report.end, SamplerEnd::StreamEnded);

        let mut forwarded = Vec::new();
        encoder_out.read_to_end(&mut forwarded).await.unwrap();
        let size = geometry().frame_size();
        assert_eq!(forwarded.len(), size * 2);
        assert!(forwarded[..size].iter().all(|b| *b == 0));
        assert_eq!(&forwarded[size..size + 3], &[0, 255, 0]);
    }

    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn detect(&mut self, _frame: &RawFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            std::thread::sleep(self.0);
            Ok(vec![BoundingBox::new(0, 0, 2, 2)])
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&mut self, _frame: &RawFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            panic!("detector crashed");
        }
    }

    #[tokio::test]
    async fn test_slow_detection_keeps_runtime_responsive() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Arc::new(AlertDispatcher::new("cam1", sink.clone(), None, None));
        let input = vec![0u8; geometry().frame_size() * 4];
        let sampler: FrameSampler<_, DuplexStream> = FrameSampler::new(
            "cam1",
            FrameReader::new(std::io::Cursor::new(input), geometry()),
            None,
            Box::new(SlowDetector(Duration::from_millis(150))),
            dispatcher.clone(),
            EventBus::new(16),
        );

        let ticker = tokio::spawn(async {
            let mut worst = Duration::ZERO;
            let mut last = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let now = tokio::time::Instant::now();
                worst = worst.max(now - last);
                last = now;
                if worst > Duration::from_millis(120) {
                    return worst;
                }
            }
        });

        let report = sampler.run().await;
        assert_eq!(report.frames, 4);
        assert_eq!(report.alerts, 4);
        assert_eq!(report.end, SamplerEnd::StreamEnded);

        assert!(!ticker.is_finished(), "runtime stalled during detection");
        ticker.abort();

        dispatcher.drain(Duration::from_secs(5)).await;
        assert_eq!(sink.payloads().len(), 4);
    }

    #[tokio::test]
    async fn test_detector_panic_ends_sampling() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Arc::new(AlertDispatcher::new("cam1", sink, None, None));
        let input = vec![0u8; geometry().frame_size() * 3];
        let sampler: FrameSampler<_, DuplexStream> = FrameSampler::new(
            "cam1",
            FrameReader::new(std::io::Cursor::new(input), geometry()),
            None,
            Box::new(PanickingDetector),
            dispatcher,
            EventBus::new(4),
        );

        let report = sampler.run().await;
        assert_eq!(report.frames, 1);
        assert!(matches!(report.end, SamplerEnd::DetectorFailed(_)));
    }

    #[tokio::test]
    async fn test_encoder_gone_ends_sampling() {
        let sink = Arc::new(RecordingSink::default());
        let (encoder_in, encoder_out) = tokio::io::duplex(16);
        drop(encoder_out);
        let input = vec![0u8; geometry().frame_size() * 3];

        let (sampler, _) = sampler(input, HashMap::new(), Some(encoder_in), sink, EventBus::new(4));
        let report = sampler.run().await;
        assert!(matches!(report.end, SamplerEnd::EncoderFailed(_)));
        assert_eq!(report.frames, 1);
    }
}
