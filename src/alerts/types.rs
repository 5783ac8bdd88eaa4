use crate::frame::{BoundingBox, RawFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// One detection occurrence on a sampled frame
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub camera_id: String,
    /// Boxes exactly as returned by the detector, in detector order
    pub boxes: Vec<BoundingBox>,
    /// Unannotated source frame, used for the snapshot
    pub frame: Option<Arc<RawFrame>>,
    pub timestamp: SystemTime,
}

impl AlertEvent {
    pub fn new(camera_id: impl Into<String>, boxes: Vec<BoundingBox>) -> Self {
        Self {
            camera_id: camera_id.into(),
            boxes,
            frame: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_frame(mut self, frame: Arc<RawFrame>) -> Self {
        self.timestamp = frame.timestamp;
        self.frame = Some(frame);
        self
    }
}

/// JSON body posted to the backend alert sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub camera_id: String,
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
}

impl AlertPayload {
    pub fn from_event(event: &AlertEvent, snapshot_url: Option<String>) -> Self {
        Self {
            camera_id: event.camera_id.clone(),
            bounding_boxes: event.boxes.clone(),
            snapshot_url,
        }
    }
}
