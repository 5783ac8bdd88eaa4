//! Test doubles shared by unit tests across modules

use crate::alerts::{AlertPayload, AlertSink};
use crate::analyzer::{Detector, DetectorFactory};
use crate::error::{AlertError, DetectorError};
use crate::frame::{BoundingBox, FrameGeometry, RawFrame};
use crate::process::{CommandPlanner, ProcessRole, ProcessSpec, StdioMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Planner that runs `sh -c` scripts in place of ffmpeg
#[derive(Debug, Clone)]
pub struct ShellPlanner {
    pub ingress: String,
    pub decode: String,
    pub encode: String,
}

impl Default for ShellPlanner {
    fn default() -> Self {
        Self {
            ingress: "exec sleep 30".to_string(),
            decode: "exec sleep 30".to_string(),
            encode: "exec cat > /dev/null".to_string(),
        }
    }
}

impl CommandPlanner for ShellPlanner {
    fn ingress_relay(&self, _camera_id: &str, _source_url: &str) -> ProcessSpec {
        ProcessSpec::new(ProcessRole::IngressRelay, "sh", ["-c", self.ingress.as_str()])
    }

    fn analysis_decode(
        &self,
        _camera_id: &str,
        _source_url: &str,
        _geometry: FrameGeometry,
        _fps: u32,
    ) -> ProcessSpec {
        ProcessSpec::new(ProcessRole::AnalysisDecode, "sh", ["-c", self.decode.as_str()])
            .stdout(StdioMode::Piped)
    }

    fn analysis_encode(&self, _camera_id: &str, _geometry: FrameGeometry, _fps: u32) -> ProcessSpec {
        ProcessSpec::new(ProcessRole::AnalysisEncode, "sh", ["-c", self.encode.as_str()])
            .stdin(StdioMode::Piped)
    }
}

/// Sink that records every payload it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    payloads: Mutex<Vec<AlertPayload>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<AlertPayload> {
        self.payloads.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn post(&self, payload: &AlertPayload) -> Result<(), AlertError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AlertError::UnexpectedStatus { status: 500 });
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

/// Returns preset boxes keyed by frame sequence number
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    script: HashMap<u64, Vec<BoundingBox>>,
}

impl ScriptedDetector {
    pub fn new(script: HashMap<u64, Vec<BoundingBox>>) -> Self {
        Self { script }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.script.get(&frame.sequence).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedDetectorFactory {
    pub script: HashMap<u64, Vec<BoundingBox>>,
}

impl DetectorFactory for ScriptedDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        Ok(Box::new(ScriptedDetector::new(self.script.clone())))
    }
}

/// Takes `delay` to load, then behaves like an empty `ScriptedDetector`
#[derive(Debug, Clone)]
pub struct SlowLoadingDetectorFactory {
    pub delay: Duration,
    pub loads: std::sync::Arc<AtomicUsize>,
}

impl SlowLoadingDetectorFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            loads: Default::default(),
        }
    }
}

impl DetectorFactory for SlowLoadingDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        std::thread::sleep(self.delay);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDetector::default()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailingDetectorFactory;

impl DetectorFactory for FailingDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        Err(DetectorError::Unavailable {
            details: "model asset missing".to_string(),
        })
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
