use super::stream::StreamSession;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Camera id -> session map. Every operation is a single short critical
/// section; nothing here awaits or touches a process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<StreamSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the camera already has an entry
    pub fn try_insert(&self, session: Arc<StreamSession>) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session.camera_id()) {
            return false;
        }
        sessions.insert(session.camera_id().to_string(), session);
        true
    }

    /// Remove whatever entry the camera has. Removing an absent id is a no-op.
    pub fn remove(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.lock().remove(camera_id)
    }

    /// Remove the entry only if it is still this exact session
    pub fn remove_session(&self, session: &Arc<StreamSession>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(session.camera_id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.camera_id());
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.lock().get(camera_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<StreamSession>> {
        let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.camera_id().cmp(b.camera_id()));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
