use serde::{Deserialize, Serialize};
use std::fmt;

/// Which processes a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    PassthroughOnly,
    PassthroughPlusAnalysis,
}

impl SessionMode {
    pub fn from_analysis(enabled: bool) -> Self {
        if enabled {
            SessionMode::PassthroughPlusAnalysis
        } else {
            SessionMode::PassthroughOnly
        }
    }

    pub fn analysis(&self) -> bool {
        matches!(self, SessionMode::PassthroughPlusAnalysis)
    }
}

/// Lifecycle of a registry entry. An absent entry is the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl SessionState {
    /// States only move forward; Starting may skip Running when stopped early
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        next > *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
