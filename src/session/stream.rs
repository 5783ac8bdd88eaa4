use super::state::{SessionMode, SessionState};
use crate::process::ProcessRole;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

/// Registry entry for one camera
#[derive(Debug)]
pub struct StreamSession {
    camera_id: String,
    run_id: Uuid,
    source_url: String,
    created_at: DateTime<Utc>,
    mode: RwLock<SessionMode>,
    state: RwLock<SessionState>,
    stop_reason: Mutex<Option<String>>,
    processes: Mutex<Vec<(ProcessRole, u32)>>,
    cancel: CancellationToken,
}

/// Serializable view of a session for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub camera_id: String,
    pub run_id: Uuid,
    pub mode: SessionMode,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub role: &'static str,
    pub pid: u32,
}

impl StreamSession {
    pub fn new(camera_id: impl Into<String>, source_url: impl Into<String>, analysis: bool) -> Self {
        Self {
            camera_id: camera_id.into(),
            run_id: Uuid::new_v4(),
            source_url: source_url.into(),
            created_at: Utc::now(),
            mode: RwLock::new(SessionMode::from_analysis(analysis)),
            state: RwLock::new(SessionState::Starting),
            stop_reason: Mutex::new(None),
            processes: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn mode(&self) -> SessionMode {
        *self.mode.read()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Drop to passthrough after the detector could not be loaded
    pub fn disable_analysis(&self) {
        *self.mode.write() = SessionMode::PassthroughOnly;
    }

    /// Move forward to `next`; returns `false` if the session is already
    /// at or past it
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return false;
        }
        debug!(camera_id = %self.camera_id, "Session {} -> {}", *state, next);
        *state = next;
        true
    }

    /// Ask the supervision task to tear down. The first reason wins.
    pub fn request_stop(&self, reason: &str) {
        {
            let mut stop_reason = self.stop_reason.lock();
            if stop_reason.is_none() {
                *stop_reason = Some(reason.to_string());
            }
        }
        self.advance(SessionState::Stopping);
        self.cancel.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.stop_reason.lock().clone()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn record_processes(&self, pids: Vec<(ProcessRole, u32)>) {
        *self.processes.lock() = pids;
    }

    pub fn processes(&self) -> Vec<(ProcessRole, u32)> {
        self.processes.lock().clone()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            camera_id: self.camera_id.clone(),
            run_id: self.run_id,
            mode: self.mode(),
            state: self.state(),
            created_at: self.created_at,
            processes: self
                .processes()
                .into_iter()
                .map(|(role, pid)| ProcessInfo {
                    role: role.as_str(),
                    pid,
                })
                .collect(),
        }
    }
}
