use crate::frame::BoundingBox;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lifecycle and alert events emitted by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// A session was reserved in the registry
    SessionStarting {
        camera_id: String,
        analysis: bool,
    },
    /// All required processes of a session are running
    SessionRunning { camera_id: String, processes: usize },
    /// Analysis was switched off for a session, passthrough continues
    AnalysisDisabled { camera_id: String, reason: String },
    /// A session began tearing down its pipeline
    SessionStopping { camera_id: String, reason: String },
    /// A session's processes were reaped and its registry entry removed
    SessionTerminated { camera_id: String },
    /// A sampled frame produced at least one detection
    AlertRaised {
        camera_id: String,
        frame_sequence: u64,
        boxes: Vec<BoundingBox>,
        timestamp: SystemTime,
    },
}

impl WorkerEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            WorkerEvent::SessionStarting { camera_id, .. }
            | WorkerEvent::SessionRunning { camera_id, .. }
            | WorkerEvent::AnalysisDisabled { camera_id, .. }
            | WorkerEvent::SessionStopping { camera_id, .. }
            | WorkerEvent::SessionTerminated { camera_id }
            | WorkerEvent::AlertRaised { camera_id, .. } => camera_id,
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::SessionStarting { .. } => "session_starting",
            WorkerEvent::SessionRunning { .. } => "session_running",
            WorkerEvent::AnalysisDisabled { .. } => "analysis_disabled",
            WorkerEvent::SessionStopping { .. } => "session_stopping",
            WorkerEvent::SessionTerminated { .. } => "session_terminated",
            WorkerEvent::AlertRaised { .. } => "alert_raised",
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            WorkerEvent::SessionStarting {
                camera_id,
                analysis,
            } => format!("[{}] session starting (analysis: {})", camera_id, analysis),
            WorkerEvent::SessionRunning {
                camera_id,
                processes,
            } => format!("[{}] session running with {} process(es)", camera_id, processes),
            WorkerEvent::AnalysisDisabled { camera_id, reason } => {
                format!("[{}] analysis disabled: {}", camera_id, reason)
            }
            WorkerEvent::SessionStopping { camera_id, reason } => {
                format!("[{}] session stopping: {}", camera_id, reason)
            }
            WorkerEvent::SessionTerminated { camera_id } => {
                format!("[{}] session terminated", camera_id)
            }
            WorkerEvent::AlertRaised {
                camera_id,
                frame_sequence,
                boxes,
                ..
            } => format!(
                "[{}] {} detection(s) in frame {}",
                camera_id,
                boxes.len(),
                frame_sequence
            ),
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkerEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Publish an event; returns the number of subscribers that saw it
    pub fn publish(&self, event: WorkerEvent) -> usize {
        match &event {
            WorkerEvent::AnalysisDisabled { camera_id, reason } => {
                warn!(camera_id = %camera_id, "Analysis disabled: {}", reason);
            }
            WorkerEvent::SessionRunning { .. } | WorkerEvent::SessionTerminated { .. } => {
                info!("{}", event.description());
            }
            _ => debug!("Event: {}", event.description()),
        }

        // No subscribers is not an error for a fire-and-forget bus
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only events of one camera
    Camera(String),
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &WorkerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Camera(id) => event.camera_id() == id,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Broadcast receiver that skips events not matching its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<WorkerEvent>,
    filter: EventFilter,
}

impl EventReceiver {
    /// Receive the next matching event; `None` once the bus is closed
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event receiver lagged behind by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
