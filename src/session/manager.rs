use super::registry::SessionRegistry;
use super::runner::run_session;
use super::stream::{SessionInfo, StreamSession};
use crate::alerts::{AlertSink, SnapshotStore};
use crate::analyzer::DetectorFactory;
use crate::config::WorkerConfig;
use crate::events::{EventBus, WorkerEvent};
use crate::frame::FrameGeometry;
use crate::process::CommandPlanner;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

const MAX_CAMERA_ID_LEN: usize = 128;

/// Per-session tunables taken from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub geometry: FrameGeometry,
    pub fps: u32,
    pub annotate: bool,
    pub grace_period: Duration,
    pub dispatch_drain: Duration,
    pub suppression_window: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            geometry: config.analysis.geometry(),
            fps: config.analysis.fps,
            annotate: config.analysis.annotate_output,
            grace_period: config.supervisor.grace_period(),
            dispatch_drain: config.supervisor.dispatch_drain(),
            suppression_window: config.alerts.suppression_window(),
        }
    }
}

/// Collaborators shared by every session
pub struct SessionContext {
    pub planner: Arc<dyn CommandPlanner>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub sink: Arc<dyn AlertSink>,
    pub snapshots: Option<Arc<SnapshotStore>>,
    pub events: EventBus,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Entry reserved; processes are launched in the background
    Started,
    /// The camera already has a session (possibly still tearing down)
    Conflict,
    Invalid(String),
    /// The worker is shutting down and accepts no new sessions
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// Start/stop entry point used by the control surface
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    context: Arc<SessionContext>,
    tracker: TaskTracker,
    accepting: Arc<AtomicBool>,
}

impl SessionManager {
    pub fn new(context: SessionContext) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            context: Arc::new(context),
            tracker: TaskTracker::new(),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.context.events
    }

    /// Reserve the camera and launch its pipeline in the background.
    ///
    /// Returns as soon as the registry entry exists; process start failures
    /// after that point are only visible in logs and events.
    pub fn start(&self, camera_id: &str, source_url: &str, analysis: bool) -> StartOutcome {
        if let Err(reason) = validate_request(camera_id, source_url) {
            return StartOutcome::Invalid(reason);
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return StartOutcome::ShuttingDown;
        }

        let session = Arc::new(StreamSession::new(camera_id, source_url, analysis));
        match self.reserve(&session) {
            StartOutcome::Started => {}
            other => return other,
        }

        info!(
            camera_id = %camera_id,
            run_id = %session.run_id(),
            "Starting stream (analysis: {})",
            analysis
        );
        self.context.events.publish(WorkerEvent::SessionStarting {
            camera_id: camera_id.to_string(),
            analysis,
        });

        self.tracker.spawn(run_session(
            session,
            self.registry.clone(),
            self.context.clone(),
        ));
        StartOutcome::Started
    }

    /// Insert the entry, backing out if `shutdown_all` began meanwhile: its
    /// registry snapshot may already have been taken without this session.
    fn reserve(&self, session: &Arc<StreamSession>) -> StartOutcome {
        if !self.registry.try_insert(session.clone()) {
            info!(camera_id = %session.camera_id(), "Stream already running");
            return StartOutcome::Conflict;
        }
        if !self.accepting.load(Ordering::SeqCst) {
            self.registry.remove_session(session);
            return StartOutcome::ShuttingDown;
        }
        StartOutcome::Started
    }

    /// Request teardown. The entry stays, in `Stopping`, until every process
    /// has been reaped.
    pub fn stop(&self, camera_id: &str) -> StopOutcome {
        match self.registry.lookup(camera_id) {
            Some(session) => {
                info!(camera_id = %camera_id, "Stop requested");
                session.request_stop("stop requested");
                StopOutcome::Stopped
            }
            None => StopOutcome::NotFound,
        }
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            active_sessions: self.registry.len(),
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().iter().map(|s| s.info()).collect()
    }

    pub fn lookup(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.registry.lookup(camera_id)
    }

    /// Stop every session and wait for their supervision tasks.
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown_all(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);

        let sessions = self.registry.list();
        info!("Stopping {} session(s)", sessions.len());
        for session in &sessions {
            session.request_stop("worker shutdown");
        }

        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} session(s) still tearing down after {:?}",
                    self.registry.len(),
                    timeout
                );
                false
            }
        }
    }
}

fn validate_request(camera_id: &str, source_url: &str) -> Result<(), String> {
    if camera_id.is_empty() {
        return Err("camera id is empty".to_string());
    }
    if camera_id.len() > MAX_CAMERA_ID_LEN {
        return Err(format!(
            "camera id is longer than {} characters",
            MAX_CAMERA_ID_LEN
        ));
    }
    // The id becomes part of a publish path and a file name
    if !camera_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || camera_id.starts_with('.')
    {
        return Err(format!("camera id '{}' contains invalid characters", camera_id));
    }
    if source_url.trim().is_empty() {
        return Err("source url is empty".to_string());
    }
    if source_url.chars().any(char::is_whitespace) {
        return Err("source url contains whitespace".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedDetectorFactory, ShellPlanner};

    fn manager() -> SessionManager {
        SessionManager::new(SessionContext {
            planner: Arc::new(ShellPlanner::default()),
            detectors: Arc::new(ScriptedDetectorFactory::default()),
            sink: Arc::new(RecordingSink::default()),
            snapshots: None,
            events: EventBus::new(16),
            settings: SessionSettings::from_config(&WorkerConfig::default()),
        })
    }

    #[test]
    fn test_reserve_backs_out_once_shutdown_began() {
        let manager = manager();
        let session = Arc::new(StreamSession::new("cam1", "rtsp://src/cam1", false));

        // Shutdown flips the flag after start's first check has passed
        manager.accepting.store(false, Ordering::SeqCst);
        assert_eq!(manager.reserve(&session), StartOutcome::ShuttingDown);
        assert!(manager.lookup("cam1").is_none());
        assert!(manager.registry.is_empty());
    }

    #[test]
    fn test_reserve_conflict_keeps_existing_entry() {
        let manager = manager();
        let first = Arc::new(StreamSession::new("cam1", "rtsp://src/cam1", false));
        let second = Arc::new(StreamSession::new("cam1", "rtsp://src/cam1", false));

        assert_eq!(manager.reserve(&first), StartOutcome::Started);
        assert_eq!(manager.reserve(&second), StartOutcome::Conflict);
        assert!(Arc::ptr_eq(&manager.lookup("cam1").unwrap(), &first));
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request("cam-1_a.b", "rtsp://host/stream").is_ok());
        assert!(validate_request("", "rtsp://host").is_err());
        assert!(validate_request("cam/1", "rtsp://host").is_err());
        assert!(validate_request("..", "rtsp://host").is_err());
        assert!(validate_request(&"a".repeat(129), "rtsp://host").is_err());
        assert!(validate_request("cam1", "").is_err());
        assert!(validate_request("cam1", "rtsp://host/a b").is_err());
    }
}
