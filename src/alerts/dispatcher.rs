use super::sink::AlertSink;
use super::snapshot::SnapshotStore;
use super::types::{AlertEvent, AlertPayload};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Fire-and-forget alert delivery for one session.
///
/// Every dispatched event runs as its own tracked task: snapshot first, then
/// the sink post. Failures are logged and dropped; nothing is retried.
pub struct AlertDispatcher {
    camera_id: String,
    sink: Arc<dyn AlertSink>,
    snapshots: Option<Arc<SnapshotStore>>,
    tracker: TaskTracker,
    suppression_window: Option<Duration>,
    last_dispatch: Mutex<Option<Instant>>,
}

impl AlertDispatcher {
    pub fn new(
        camera_id: impl Into<String>,
        sink: Arc<dyn AlertSink>,
        snapshots: Option<Arc<SnapshotStore>>,
        suppression_window: Option<Duration>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            sink,
            snapshots,
            tracker: TaskTracker::new(),
            suppression_window,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Queue delivery of one alert. Returns `false` when the suppression
    /// window swallowed it.
    pub fn dispatch(&self, event: AlertEvent) -> bool {
        if self.is_suppressed() {
            debug!(camera_id = %self.camera_id, "Alert suppressed by window");
            return false;
        }

        let sink = self.sink.clone();
        let snapshots = self.snapshots.clone();
        self.tracker.spawn(async move {
            deliver(sink, snapshots, event).await;
        });
        true
    }

    /// Stop accepting work and wait for in-flight deliveries.
    /// Returns `false` if the timeout elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    camera_id = %self.camera_id,
                    "{} alert delivery task(s) still running after {:?}",
                    self.tracker.len(),
                    timeout
                );
                false
            }
        }
    }

    fn is_suppressed(&self) -> bool {
        let window = match self.suppression_window {
            Some(window) => window,
            None => return false,
        };

        let now = Instant::now();
        let mut last = self.last_dispatch.lock();
        match *last {
            Some(previous) if now.duration_since(previous) < window => true,
            _ => {
                *last = Some(now);
                false
            }
        }
    }
}

async fn deliver(
    sink: Arc<dyn AlertSink>,
    snapshots: Option<Arc<SnapshotStore>>,
    event: AlertEvent,
) {
    let snapshot_url = match (snapshots, event.frame.clone()) {
        (Some(store), Some(frame)) => {
            match store.write(&event.camera_id, frame, &event.boxes).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(camera_id = %event.camera_id, "{}", e);
                    None
                }
            }
        }
        _ => None,
    };

    let payload = AlertPayload::from_event(&event, snapshot_url);
    if let Err(e) = sink.post(&payload).await {
        warn!(camera_id = %event.camera_id, "Alert delivery failed: {}", e);
    }
}
